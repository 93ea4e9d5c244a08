//! Parameter extraction from free-form tasks
//!
//! A deliberately narrow set of patterns, applied only when the caller did
//! not pass explicit params. Each pattern takes its first occurrence in the
//! task and assigns it to a schema input by name (or description hint).
//! Anything fancier belongs in the caller's own prompt, not here.

use crate::capability::{Capability, ParamType};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r#"https?://[^\s"'<>]+"#) {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(
        || match Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}") {
            Ok(re) => re,
            Err(_) => unreachable!("static regex pattern is valid"),
        },
    )
}

/// Bare domain with one of the TLDs agents actually throw at the gateway.
fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        match Regex::new(
            r"\b([a-z0-9][a-z0-9-]*(?:\.[a-z0-9][a-z0-9-]*)*\.(?:com|org|net|io|ai|dev|co|app|xyz|me|info|tech|gg|tv))\b",
        ) {
            Ok(re) => re,
            Err(_) => unreachable!("static regex pattern is valid"),
        }
    })
}

fn dimensions_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"(\d{2,5})\s*[x×]\s*(\d{2,5})") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

fn pixel_size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"(\d{1,5})\s*px\b") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

fn format_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"\b(png|jpeg|jpg|webp|pdf)\b") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

/// Find the schema input a value should land in: exact name first, then an
/// input whose description mentions the hint.
fn target_input<'a>(capability: &'a Capability, name: &str, hint: &str) -> Option<&'a str> {
    if let Some((key, _)) = capability.inputs.get_key_value(name) {
        return Some(key.as_str());
    }
    capability
        .inputs
        .iter()
        .find(|(_, spec)| spec.description.to_lowercase().contains(hint))
        .map(|(key, _)| key.as_str())
}

/// Extract parameters for `capability` from a free-form task.
///
/// Returns the extracted map; schema defaults and required-field validation
/// are the caller's next moves.
pub fn extract_params(capability: &Capability, task: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let lower = task.to_lowercase();

    if let Some(m) = url_regex().find(task) {
        let url = m.as_str().trim_end_matches(['.', ',', ')', ']']);
        if let Some(key) = target_input(capability, "url", "url") {
            params.insert(key.to_string(), json!(url));
        } else if capability.inputs.contains_key("data") {
            params.insert("data".to_string(), json!(url));
        }
    }

    if let Some(m) = email_regex().find(task) {
        if let Some(key) = target_input(capability, "email", "email") {
            params.insert(key.to_string(), json!(m.as_str()));
        }
    }

    if let Some(caps) = domain_regex().captures(&lower) {
        if let Some(domain) = caps.get(1) {
            if capability.inputs.contains_key("domain") {
                params.insert("domain".to_string(), json!(domain.as_str()));
            }
            // A bare domain also satisfies a url input when no explicit URL
            // was given.
            if capability.inputs.contains_key("url") && !params.contains_key("url") {
                params.insert("url".to_string(), json!(format!("https://{}", domain.as_str())));
            }
        }
    }

    if let Some(caps) = dimensions_regex().captures(task) {
        if capability.inputs.contains_key("width") && capability.inputs.contains_key("height") {
            if let (Some(w), Some(h)) = (caps.get(1), caps.get(2)) {
                if let (Ok(w), Ok(h)) = (w.as_str().parse::<u32>(), h.as_str().parse::<u32>()) {
                    params.insert("width".to_string(), json!(w));
                    params.insert("height".to_string(), json!(h));
                }
            }
        }
    }

    if let Some(caps) = pixel_size_regex().captures(&lower) {
        if capability.inputs.contains_key("size") {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                params.insert("size".to_string(), json!(n));
            }
        }
    }

    if (lower.contains("full page") || lower.contains("fullpage"))
        && capability.inputs.contains_key("fullPage")
    {
        params.insert("fullPage".to_string(), json!(true));
    }

    if let Some(caps) = format_regex().captures(&lower) {
        if capability.inputs.contains_key("format") {
            if let Some(fmt) = caps.get(1) {
                params.insert("format".to_string(), json!(fmt.as_str()));
            }
        }
    }

    coerce_types(capability, &mut params);
    params
}

/// Nudge extracted string values toward the schema's declared types.
fn coerce_types(capability: &Capability, params: &mut Map<String, Value>) {
    for (key, value) in params.iter_mut() {
        let Some(spec) = capability.inputs.get(key) else {
            continue;
        };
        if let (ParamType::Number, Value::String(s)) = (spec.param_type, &*value) {
            if let Ok(n) = s.parse::<f64>() {
                *value = json!(n);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::builtin_catalog;

    fn capability(id: &str) -> Capability {
        builtin_catalog("http://127.0.0.1:9000")
            .unwrap()
            .into_iter()
            .find(|c| c.id == id)
            .unwrap()
    }

    #[test]
    fn test_url_lands_in_url_input() {
        let cap = capability("screenshot");
        let params = extract_params(&cap, "take a screenshot of https://example.com");
        assert_eq!(params.get("url"), Some(&json!("https://example.com")));
    }

    #[test]
    fn test_url_falls_back_to_data() {
        let cap = capability("qr-code");
        let params = extract_params(&cap, "make a qr code for https://pylonapi.com");
        assert_eq!(params.get("data"), Some(&json!("https://pylonapi.com")));
    }

    #[test]
    fn test_email_extraction() {
        let cap = capability("email-validate");
        let params = extract_params(&cap, "is alice@example.com deliverable?");
        assert_eq!(params.get("email"), Some(&json!("alice@example.com")));
    }

    #[test]
    fn test_domain_backfills_url() {
        let cap = capability("screenshot");
        let params = extract_params(&cap, "screenshot example.dev for me");
        assert_eq!(params.get("url"), Some(&json!("https://example.dev")));
    }

    #[test]
    fn test_explicit_url_beats_domain_backfill() {
        let cap = capability("screenshot");
        let params = extract_params(&cap, "screenshot https://a.io not b.io");
        assert_eq!(params.get("url"), Some(&json!("https://a.io")));
    }

    #[test]
    fn test_dimensions_and_format() {
        let cap = capability("screenshot");
        let params = extract_params(&cap, "screenshot https://a.com at 1920x1080 as jpeg");
        assert_eq!(params.get("width"), Some(&json!(1920)));
        assert_eq!(params.get("height"), Some(&json!(1080)));
        assert_eq!(params.get("format"), Some(&json!("jpeg")));
    }

    #[test]
    fn test_full_page_flag() {
        let cap = capability("screenshot");
        let params = extract_params(&cap, "full page screenshot of https://a.com");
        assert_eq!(params.get("fullPage"), Some(&json!(true)));
    }

    #[test]
    fn test_pixel_size() {
        let cap = capability("qr-code");
        let params = extract_params(&cap, "qr code for hello at 512px");
        assert_eq!(params.get("size"), Some(&json!(512)));
    }

    #[test]
    fn test_unicode_dimension_separator() {
        let cap = capability("image-resize");
        let params = extract_params(&cap, "resize https://a.com/cat.png to 640×480");
        assert_eq!(params.get("width"), Some(&json!(640)));
        assert_eq!(params.get("height"), Some(&json!(480)));
    }
}
