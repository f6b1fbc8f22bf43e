//! Request builders for each pipeline stage.
//!
//! Every builder is a pure function of its inputs, so the exact prompt sent to the
//! model can be asserted without a gateway.

use crate::gateway::{GatewayRequest, Part};
use crate::models::{AspectRatio, BrandBrief, BrandDna, CreativeConcept, ImageData, SourceImage, Stage, non_blank};
use crate::schema;

pub const POSTER_ASPECT_RATIO: AspectRatio = AspectRatio::Landscape;

fn or_na(value: &str) -> &str {
    non_blank(value).unwrap_or("N/A")
}

pub fn auto_fill(description: &str, url: &str) -> GatewayRequest {
    let prompt = format!(
        "You are a brand strategist preparing a campaign brief for a small food business.

Inputs:
- Description: \"{description}\"
- Website: \"{url}\"

Task:
Use web search to research the business if a website or name is given. Then infer:
1. brandDescription: a refined one-paragraph description of the brand and what it sells.
2. audience: the primary target audience.
3. tone: the tone of voice in a few words.
4. direction: a creative direction for campaign visuals (colors, mood, photography style).
5. logoUrl: a direct URL to the brand's logo image file (png, jpg, svg) if you can find one. Leave it out if unsure.

Respond with only a JSON object of this exact shape, no commentary:
{{\"brandDescription\": \"...\", \"audience\": \"...\", \"tone\": \"...\", \"direction\": \"...\", \"logoUrl\": \"...\"}}",
        description = description.trim(),
        url = url.trim(),
    );
    GatewayRequest::text(Stage::AutoFill, vec![Part::Text(prompt)]).with_web_search()
}

pub fn brand_dna(brief: &BrandBrief, source: Option<SourceImage<'_>>) -> GatewayRequest {
    let mut prompt = format!(
        "Analyze the provided brand assets to extract a structured Brand DNA profile.

Inputs:
- Description: \"{}\"
- Website: \"{}\"
- Product: \"{}\"",
        brief.description.trim(),
        brief.url.trim(),
        brief.product_name().or(source.and_then(|s| s.product_name)).unwrap_or("Food Item"),
    );
    if let Some(audience) = non_blank(&brief.target_audience) {
        prompt.push_str(&format!("\n- Target Audience: \"{audience}\""));
    }
    if let Some(tone) = non_blank(&brief.tone) {
        prompt.push_str(&format!("\n- Desired Tone: \"{tone}\" (use this as the final tone)"));
    }
    if let Some(direction) = non_blank(&brief.creative_direction) {
        prompt.push_str(&format!("\n- Creative Direction: \"{direction}\""));
    }
    if brief.logo.is_some() {
        prompt.push_str("\n- A logo image is attached.");
    }
    if source.is_some() {
        prompt.push_str("\n- A sample product/food photo is attached.");
    }
    prompt.push_str(
        "

Task:
1. Infer the Brand Name if not explicitly stated.
2. Refine the description into one clear paragraph.
3. Determine the Tone of Voice. If a desired tone is given, it takes priority.
4. Analyze the visual style (colors, fonts, lighting, plating, vibe) from the logo and the sample product photo. The product photo is a key indicator of the brand's aesthetic.
5. Extract key themes/keywords.",
    );

    let mut parts = vec![Part::Text(prompt)];
    if let Some(logo) = &brief.logo {
        parts.push(Part::InlineImage(logo.clone()));
    }
    if let Some(source) = source {
        parts.push(Part::InlineImage(source.image.clone()));
    }
    GatewayRequest::text(Stage::BrandDna, parts).with_schema(schema::brand_dna())
}

pub fn ideation(dna: &BrandDna, source: SourceImage<'_>) -> GatewayRequest {
    let prompt = format!(
        "You are a world-class Creative Director.

Context:
We have a photo of \"{product}\" and need to create an advertising poster campaign for the brand \"{name}\".

Brand DNA:
- Tone: {tone}
- Visual Style: {style}
- Keywords: {keywords}

Task:
Analyze the attached food image. Generate exactly 3 DISTINCT creative concepts for a poster.
Each concept must take a different angle: one focused on ingredients, one on lifestyle/mood, and one on bold humor or a striking layout/typography treatment.

For each concept, provide:
1. id: A short unique identifier.
2. title: A short internal name for the concept.
3. rationale: Why this works for the image and brand.
4. visualPrompt: A detailed prompt for an AI image generator to create a polished poster version of the food, incorporating brand colors/style.
5. copyAngle: Instructions for the copywriter.
6. overlayCtas: 1 to 3 short, punchy 2-5 word headlines to render on the poster (e.g. \"Taste the Fire\", \"Order Now\", \"Weekend Special\").",
        product = source.product_name.unwrap_or("Food Item"),
        name = dna.name,
        tone = dna.tone,
        style = dna.visual_style,
        keywords = dna.keywords.join(", "),
    );
    GatewayRequest::text(Stage::Ideation, vec![Part::Text(prompt), Part::InlineImage(source.image.clone())])
        .with_schema(schema::concept_batch())
}

pub fn hero_image(dna: &BrandDna, source: SourceImage<'_>, concept: &CreativeConcept, cta: &str) -> GatewayRequest {
    let product = source.product_name.unwrap_or("Food Item");
    let logo_line = if dna.logo_image.is_some() {
        "- Integrate the provided logo (Image 2) cleanly as a design element, e.g. in a corner or next to the headline."
    } else {
        "- No logo is provided. Do not invent one."
    };
    let prompt = format!(
        "Design a professional, high-quality advertising poster.

Subject: {product}
Style/Concept: {title}
Art Direction: {visual}

Brand Identity:
- Name: {name}
- Style: {style}
- Tone: {tone}

Requirements:
- Aspect Ratio: {ratio}
- CRITICAL: Render the headline \"{cta}\" directly in the image as bold, legible typography. Spell it exactly.
{logo_line}
- Use Image 1 as the primary reference for the food item. Keep it recognisable and appetizing.
- Photorealistic food photography with professional studio lighting.",
        title = concept.title,
        visual = concept.visual_prompt,
        name = dna.name,
        style = dna.visual_style,
        tone = dna.tone,
        ratio = POSTER_ASPECT_RATIO.as_str(),
    );

    let mut parts = vec![
        Part::Text(prompt),
        Part::text("Image 1 (product reference):"),
        Part::InlineImage(source.image.clone()),
    ];
    if let Some(logo) = &dna.logo_image {
        parts.push(Part::text("Image 2 (logo reference):"));
        parts.push(Part::InlineImage(logo.clone()));
    }
    GatewayRequest::image(Stage::HeroImage, parts, POSTER_ASPECT_RATIO)
}

pub fn edit_image(image: &ImageData, instruction: &str) -> GatewayRequest {
    let prompt = format!(
        "Edit the attached advertising poster: {}

Keep the {} aspect ratio, the overall aesthetic, the headline text and the logo unless the instruction says otherwise.",
        instruction.trim(),
        POSTER_ASPECT_RATIO.as_str(),
    );
    GatewayRequest::image(Stage::Edit, vec![Part::InlineImage(image.clone()), Part::Text(prompt)], POSTER_ASPECT_RATIO)
}

pub fn post_copy(dna: &BrandDna, concept: &CreativeConcept, product_name: Option<&str>) -> GatewayRequest {
    let website = dna.website_url.as_deref().map(or_na).unwrap_or("N/A");
    let prompt = format!(
        "Write a social media post for \"{name}\" promoting \"{product}\".

Concept Strategy: \"{title}\"
Copy Instructions: \"{angle}\"

Brand DNA:
- Tone: {tone}
- Keywords: {keywords}
- Website: {website}

Format:
- Headline (Catchy)
- Body (Engaging, ~2 paragraphs)
- Call to Action (Link to website if available)
- Hashtags",
        name = dna.name,
        product = product_name.unwrap_or("Food Item"),
        title = concept.title,
        angle = concept.copy_angle,
        tone = dna.tone,
        keywords = dna.keywords.join(", "),
    );
    GatewayRequest::text(Stage::PostCopy, vec![Part::Text(prompt)])
}

/// Short human-readable description of what the poster was asked to show.
pub fn poster_summary(concept: &CreativeConcept, cta: &str, product_name: Option<&str>, has_logo: bool) -> String {
    let mut summary = format!(
        "Design a professional, high-quality advertising poster.

Subject: {}
Style/Concept: {}
Art Direction: {}

CRITICAL: Render headline \"{}\" directly in image.",
        product_name.unwrap_or("Food Item"),
        concept.title,
        concept.visual_prompt,
        cta,
    );
    if has_logo {
        summary.push_str("\nIncorporating provided logo.");
    }
    summary
}
