//! Request validation and prompt sanitization.
//!
//! Everything in here is pure: raw payload in, either a
//! [`GenerationRequest`] or a [`AppError::Validation`] out.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_DIMENSION, MAX_ASPECT_RATIO, MAX_DIMENSION, MAX_GUIDANCE_SCALE, MAX_STEPS,
    MIN_DIMENSION, MIN_GUIDANCE_SCALE, MIN_STEPS, PROMPT_MAX_CHARS,
};
use crate::error::AppError;

/// Markup fragments stripped from prompts before they reach the model.
#[allow(clippy::expect_used)] // patterns are static and known-good
static HARMFUL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"(?is)<iframe[^>]*>.*?</iframe>",
        r"(?is)<object[^>]*>.*?</object>",
        r"(?is)<embed[^>]*>.*?</embed>",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern"))
    .collect()
});

#[allow(clippy::expect_used)] // pattern is static and known-good
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Keywords that get a prompt rejected outright.
const BLOCKED_KEYWORDS: [&str; 8] = [
    "explicit", "nsfw", "nude", "naked", "porn", "xxx", "gore", "beheading",
];

/// Raw, untrusted generation payload as received over the wire.
#[derive(Debug, Default, Deserialize)]
pub struct GeneratePayload {
    /// Free-text prompt; required.
    #[serde(default)]
    pub prompt: String,
    /// Image width in pixels; defaults to 1024.
    pub width: Option<i64>,
    /// Image height in pixels; defaults to 1024.
    pub height: Option<i64>,
    /// Model name; defaults to `flux`.
    pub model: Option<String>,
    /// Random seed for reproducible output.
    pub seed: Option<i64>,
    /// Inference step count.
    pub steps: Option<i64>,
    /// Guidance scale.
    pub guidance_scale: Option<f64>,
}

/// Models the backend accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModelKind {
    /// Default general-purpose model.
    Flux,
    /// Faster, lower-quality model.
    Turbo,
}

impl ModelKind {
    /// Wire name of the model.
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Flux => "flux",
            ModelKind::Turbo => "turbo",
        }
    }

    /// Every accepted model name, for the front-end picker.
    pub fn names() -> [&'static str; 2] {
        ["flux", "turbo"]
    }
}

/// A validated, sanitized generation request. Immutable once built.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Sanitized prompt text.
    pub prompt: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Which model to invoke.
    pub model: ModelKind,
    /// Optional random seed.
    pub seed: Option<u32>,
    /// Optional inference step count.
    pub steps: Option<u32>,
    /// Optional guidance scale.
    pub guidance_scale: Option<f32>,
}

/// Validates a raw payload into a [`GenerationRequest`].
pub fn build_request(payload: GeneratePayload) -> Result<GenerationRequest, AppError> {
    let prompt = validate_prompt(&payload.prompt)?;
    let (width, height) = validate_dimensions(
        payload.width.unwrap_or(DEFAULT_DIMENSION as i64),
        payload.height.unwrap_or(DEFAULT_DIMENSION as i64),
    )?;
    let model = validate_model(payload.model.as_deref())?;
    let seed = validate_seed(payload.seed)?;
    let steps = validate_steps(payload.steps)?;
    let guidance_scale = validate_guidance_scale(payload.guidance_scale)?;

    Ok(GenerationRequest {
        prompt,
        width,
        height,
        model,
        seed,
        steps,
        guidance_scale,
    })
}

/// Checks length and content limits, then returns the sanitized prompt.
pub fn validate_prompt(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("Prompt cannot be empty".to_string()));
    }
    if trimmed.chars().count() > PROMPT_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "Prompt must be {} characters or less",
            PROMPT_MAX_CHARS
        )));
    }

    let mut sanitized = html_escape::encode_text(trimmed).into_owned();
    for pattern in HARMFUL_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, "").into_owned();
    }

    let lowered = sanitized.to_lowercase();
    if BLOCKED_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        return Err(AppError::Validation(
            "Prompt contains inappropriate content".to_string(),
        ));
    }

    let sanitized = WHITESPACE
        .replace_all(&sanitized, " ")
        .trim()
        .to_string();
    if sanitized.is_empty() {
        return Err(AppError::Validation(
            "Prompt is empty after sanitization".to_string(),
        ));
    }

    // Escaping can push the prompt past the limit; reject rather than cut
    // an entity in half.
    if sanitized.chars().count() > PROMPT_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "Prompt must be {} characters or less",
            PROMPT_MAX_CHARS
        )));
    }

    Ok(sanitized)
}

/// Checks dimension bounds and aspect ratio.
pub fn validate_dimensions(width: i64, height: i64) -> Result<(u32, u32), AppError> {
    let in_bounds = |value: i64| value >= MIN_DIMENSION as i64 && value <= MAX_DIMENSION as i64;
    if !in_bounds(width) || !in_bounds(height) {
        return Err(AppError::Validation(format!(
            "Width and height must be between {} and {} pixels",
            MIN_DIMENSION, MAX_DIMENSION
        )));
    }

    let long = width.max(height) as f64;
    let short = width.min(height) as f64;
    if long / short > MAX_ASPECT_RATIO {
        return Err(AppError::Validation(
            "Aspect ratio must not exceed 4:1".to_string(),
        ));
    }

    Ok((width as u32, height as u32))
}

/// Checks the seed is a u32 if present.
pub fn validate_seed(seed: Option<i64>) -> Result<Option<u32>, AppError> {
    match seed {
        None => Ok(None),
        Some(value) if value < 0 => Err(AppError::Validation(
            "Seed must be a non-negative integer".to_string(),
        )),
        Some(value) if value > u32::MAX as i64 => {
            Err(AppError::Validation("Seed value is too large".to_string()))
        }
        Some(value) => Ok(Some(value as u32)),
    }
}

/// Resolves the model name against the accepted set.
pub fn validate_model(model: Option<&str>) -> Result<ModelKind, AppError> {
    let name = model.unwrap_or_default().trim().to_ascii_lowercase();
    match name.as_str() {
        "" | "flux" => Ok(ModelKind::Flux),
        "turbo" => Ok(ModelKind::Turbo),
        _ => Err(AppError::Validation(format!(
            "Model must be one of: {}",
            ModelKind::names().join(", ")
        ))),
    }
}

/// Checks the step count range if present.
pub fn validate_steps(steps: Option<i64>) -> Result<Option<u32>, AppError> {
    match steps {
        None => Ok(None),
        Some(value) if (MIN_STEPS..=MAX_STEPS).contains(&value) => Ok(Some(value as u32)),
        Some(_) => Err(AppError::Validation(format!(
            "Steps must be between {} and {}",
            MIN_STEPS, MAX_STEPS
        ))),
    }
}

/// Checks the guidance scale range if present.
pub fn validate_guidance_scale(value: Option<f64>) -> Result<Option<f32>, AppError> {
    match value {
        None => Ok(None),
        Some(scale)
            if scale.is_finite() && (MIN_GUIDANCE_SCALE..=MAX_GUIDANCE_SCALE).contains(&scale) =>
        {
            Ok(Some(scale as f32))
        }
        Some(_) => Err(AppError::Validation(format!(
            "Guidance scale must be between {} and {}",
            MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_validation_err<T: std::fmt::Debug>(result: Result<T, AppError>, needle: &str) {
        match result {
            Err(AppError::Validation(message)) => {
                assert!(
                    message.contains(needle),
                    "expected {:?} to contain {:?}",
                    message,
                    needle
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn accepts_prompts_within_bounds() {
        assert_eq!(validate_prompt("a").expect("single char"), "a");
        let long = "y".repeat(500);
        assert_eq!(validate_prompt(&long).expect("500 chars"), long);
    }

    #[test]
    fn rejects_empty_and_oversized_prompts() {
        assert_validation_err(validate_prompt(""), "empty");
        assert_validation_err(validate_prompt("   \t\n"), "empty");
        assert_validation_err(validate_prompt(&"x".repeat(501)), "500");
    }

    #[test]
    fn strips_markup_and_collapses_whitespace() {
        let cleaned = validate_prompt("a red   fox\njumping").expect("valid prompt");
        assert_eq!(cleaned, "a red fox jumping");

        let cleaned = validate_prompt("fox javascript:alert(1) painting").expect("valid prompt");
        assert!(!cleaned.contains("javascript:"));
    }

    #[test]
    fn prompts_that_grow_past_the_limit_when_escaped_are_rejected() {
        // 300 raw chars, but each escapes to `&amp;`.
        assert_validation_err(validate_prompt(&"&".repeat(300)), "500");
        assert_eq!(
            validate_prompt("salt & pepper").expect("escaping within bounds"),
            "salt &amp; pepper"
        );
    }

    #[test]
    fn rejects_blocked_keywords() {
        assert_validation_err(validate_prompt("nsfw picture of anything"), "inappropriate");
    }

    #[test]
    fn dimension_bounds_and_aspect_ratio() {
        assert_eq!(validate_dimensions(512, 512).expect("square"), (512, 512));
        assert_eq!(
            validate_dimensions(2048, 512).expect("4:1 is allowed"),
            (2048, 512)
        );
        assert_validation_err(validate_dimensions(255, 512), "between");
        assert_validation_err(validate_dimensions(512, 2049), "between");
        assert_validation_err(validate_dimensions(2048, 500), "Aspect ratio");
        assert_validation_err(validate_dimensions(-1, 512), "between");
    }

    #[test]
    fn seed_range() {
        assert_eq!(validate_seed(None).expect("absent seed"), None);
        assert_eq!(validate_seed(Some(42)).expect("valid seed"), Some(42));
        assert_validation_err(validate_seed(Some(-1)), "non-negative");
        assert_validation_err(validate_seed(Some(u32::MAX as i64 + 1)), "too large");
    }

    #[test]
    fn model_whitelist() {
        assert_eq!(validate_model(None).expect("default"), ModelKind::Flux);
        assert_eq!(validate_model(Some("")).expect("empty"), ModelKind::Flux);
        assert_eq!(
            validate_model(Some(" TURBO ")).expect("case-insensitive"),
            ModelKind::Turbo
        );
        assert_validation_err(validate_model(Some("dalle")), "Model must be one of");
    }

    #[test]
    fn steps_and_guidance_ranges() {
        assert_eq!(validate_steps(Some(1)).expect("min"), Some(1));
        assert_eq!(validate_steps(Some(100)).expect("max"), Some(100));
        assert_validation_err(validate_steps(Some(0)), "Steps");
        assert_validation_err(validate_steps(Some(101)), "Steps");

        assert_eq!(
            validate_guidance_scale(Some(7.5)).expect("mid"),
            Some(7.5f32)
        );
        assert_validation_err(validate_guidance_scale(Some(0.5)), "Guidance");
        assert_validation_err(validate_guidance_scale(Some(20.1)), "Guidance");
        assert_validation_err(validate_guidance_scale(Some(f64::NAN)), "Guidance");
    }

    #[test]
    fn build_request_applies_defaults() {
        let request = build_request(GeneratePayload {
            prompt: "a red fox".to_string(),
            ..Default::default()
        })
        .expect("valid payload");

        assert_eq!(request.prompt, "a red fox");
        assert_eq!(request.width, 1024);
        assert_eq!(request.height, 1024);
        assert_eq!(request.model, ModelKind::Flux);
        assert_eq!(request.seed, None);
    }
}
