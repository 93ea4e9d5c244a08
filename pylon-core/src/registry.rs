//! Capability registry
//!
//! Read-only catalog of native and partner capabilities, populated once at
//! startup. Validation failures here are fatal: a gateway with a bad catalog
//! must not come up.

use crate::capability::{
    Capability, HttpMethod, InputSpec, OutputKind, ParamType, Provider, RevenueSplit, SourceTier,
    DISCOVERED_PREFIX,
};
use crate::money::{MicroUsd, Rounding};
use indexmap::IndexMap;
use serde_json::json;

/// Errors from catalog validation at load time.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate capability id: {id}")]
    DuplicateId { id: String },

    #[error("Capability '{id}' has no endpoint")]
    MissingEndpoint { id: String },

    #[error("Capability '{id}' has no keywords; the dispatcher could never match it")]
    MissingKeywords { id: String },

    #[error("Capability '{id}' uses the reserved discovered prefix")]
    ReservedPrefix { id: String },

    #[error("Capability '{id}' revenue split does not sum to 1.0")]
    BadSplit { id: String },

    #[error("Partner capability '{id}' has no provider record")]
    MissingProvider { id: String },

    #[error("Capability '{id}' has a bad cost: {reason}")]
    BadCost { id: String, reason: String },
}

/// Static catalog of native/partner capabilities, immutable for the process
/// lifetime.
#[derive(Debug)]
pub struct CapabilityRegistry {
    capabilities: IndexMap<String, Capability>,
}

impl CapabilityRegistry {
    /// Validate and index a catalog. Any rejected entry fails the whole load.
    pub fn load(catalog: Vec<Capability>) -> Result<Self, RegistryError> {
        let mut capabilities = IndexMap::with_capacity(catalog.len());
        for cap in catalog {
            if cap.id.starts_with(DISCOVERED_PREFIX) {
                return Err(RegistryError::ReservedPrefix { id: cap.id });
            }
            if cap.endpoint.trim().is_empty() {
                return Err(RegistryError::MissingEndpoint { id: cap.id });
            }
            if cap.keywords.is_empty() {
                return Err(RegistryError::MissingKeywords { id: cap.id });
            }
            if cap.tier == SourceTier::Partner && cap.provider.is_none() {
                return Err(RegistryError::MissingProvider { id: cap.id });
            }
            if let Some(split) = &cap.split {
                if !split.is_valid() {
                    return Err(RegistryError::BadSplit { id: cap.id });
                }
            }
            if capabilities.contains_key(&cap.id) {
                return Err(RegistryError::DuplicateId { id: cap.id });
            }
            capabilities.insert(cap.id.clone(), cap);
        }
        Ok(Self { capabilities })
    }

    pub fn list(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    pub fn by_id(&self, id: &str) -> Option<&Capability> {
        self.capabilities.get(id)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// A malformed or negative cost aborts the catalog build; a typo in a
/// price literal must never ship as a free capability.
fn price(id: &str, s: &str) -> Result<MicroUsd, RegistryError> {
    MicroUsd::parse(s, Rounding::AwayFromZero).map_err(|e| RegistryError::BadCost {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

struct CatalogBuilder {
    base: String,
    entries: Vec<Capability>,
    failure: Option<RegistryError>,
}

impl CatalogBuilder {
    fn new(backend_base: &str) -> Self {
        Self {
            base: backend_base.trim_end_matches('/').to_string(),
            entries: Vec::new(),
            failure: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn native(
        mut self,
        id: &str,
        name: &str,
        description: &str,
        cost: &str,
        keywords: &[&str],
        path: &str,
        method: HttpMethod,
        inputs: IndexMap<String, InputSpec>,
        output: OutputKind,
    ) -> Self {
        if self.failure.is_some() {
            return self;
        }
        let cost = match price(id, cost) {
            Ok(cost) => cost,
            Err(error) => {
                self.failure = Some(error);
                return self;
            }
        };
        self.entries.push(Capability {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            cost,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            endpoint: format!("{}{}", self.base, path),
            method,
            inputs,
            output,
            tier: SourceTier::Native,
            provider: None,
            split: None,
            provider_cost: None,
            pay_to: None,
            network: None,
        });
        self
    }

    fn partner(mut self, mut capability: Capability) -> Self {
        if self.failure.is_some() {
            return self;
        }
        capability.tier = SourceTier::Partner;
        self.entries.push(capability);
        self
    }

    fn build(self) -> Result<Vec<Capability>, RegistryError> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.entries),
        }
    }
}

fn inputs(entries: Vec<(&str, InputSpec)>) -> IndexMap<String, InputSpec> {
    entries
        .into_iter()
        .map(|(name, spec)| (name.to_string(), spec))
        .collect()
}

/// The built-in Pylon catalog.
///
/// `backend_base` is the root under which the leaf capability servers are
/// mounted (one path segment per capability, mirroring the per-service
/// deployments). Any bad entry fails the whole build, which is fatal at
/// startup.
pub fn builtin_catalog(backend_base: &str) -> Result<Vec<Capability>, RegistryError> {
    use HttpMethod::{Get, Post};
    use OutputKind::{Image, Json, Pdf};
    use ParamType::{Number, String as Str};

    CatalogBuilder::new(backend_base)
        .native(
            "screenshot",
            "Screenshot",
            "Capture a screenshot of any webpage as PNG or JPEG",
            "$0.01",
            &["screenshot", "capture", "webpage", "visual", "render"],
            "/screenshot",
            Get,
            inputs(vec![
                ("url", InputSpec::required(Str, "URL of the webpage to screenshot")),
                (
                    "width",
                    InputSpec::optional(Number, json!(1280), "Viewport width in pixels"),
                ),
                (
                    "height",
                    InputSpec::optional(Number, json!(720), "Viewport height in pixels"),
                ),
                (
                    "fullPage",
                    InputSpec::optional(ParamType::Boolean, json!(false), "Capture full scrollable page"),
                ),
                (
                    "format",
                    InputSpec::optional(Str, json!("png"), "Image format: png or jpeg"),
                ),
            ]),
            Image,
        )
        .native(
            "web-scrape",
            "Web Scraper",
            "Scrape a webpage and extract its content as markdown",
            "$0.01",
            &["scrape", "extract", "content", "markdown", "webpage"],
            "/scrape",
            Get,
            inputs(vec![(
                "url",
                InputSpec::required(Str, "URL of the page to scrape"),
            )]),
            Json,
        )
        .native(
            "search",
            "Web Search",
            "Search the web and return ranked results",
            "$0.01",
            &["search", "web", "results", "query", "find"],
            "/search",
            Get,
            inputs(vec![(
                "query",
                InputSpec::required(Str, "Search query terms"),
            )]),
            Json,
        )
        .native(
            "pdf-extract",
            "PDF Extract",
            "Extract text and metadata from a PDF document by URL",
            "$0.02",
            &["pdf", "extract", "text", "document", "parse"],
            "/parse",
            Get,
            inputs(vec![(
                "url",
                InputSpec::required(Str, "URL of the PDF to parse"),
            )]),
            Json,
        )
        .native(
            "ocr",
            "OCR",
            "Extract text from an image using optical character recognition",
            "$0.03",
            &["ocr", "image", "text", "recognition", "read"],
            "/ocr",
            Get,
            inputs(vec![
                ("url", InputSpec::required(Str, "URL of the image to OCR")),
                (
                    "language",
                    InputSpec::optional(Str, json!("eng"), "OCR language (e.g. eng, spa, fra)"),
                ),
            ]),
            Json,
        )
        .native(
            "email-validate",
            "Email Validator",
            "Validate an email address: format, MX records, deliverability",
            "$0.005",
            &["email", "validate", "verify", "deliverable", "mx"],
            "/validate",
            Get,
            inputs(vec![(
                "email",
                InputSpec::required(Str, "Email address to validate"),
            )]),
            Json,
        )
        .native(
            "domain-intel",
            "Domain Intel",
            "WHOIS, DNS records, SSL certificate and tech stack for a domain",
            "$0.01",
            &["domain", "whois", "dns", "ssl", "intel", "lookup"],
            "/intel",
            Get,
            inputs(vec![(
                "domain",
                InputSpec::required(Str, "Domain name to analyze (e.g. example.com)"),
            )]),
            Json,
        )
        .native(
            "qr-code",
            "QR Code",
            "Generate a QR code image from text or a URL",
            "$0.005",
            &["qr", "code", "generate", "barcode"],
            "/generate",
            Get,
            inputs(vec![
                (
                    "data",
                    InputSpec::required(Str, "Data to encode in the QR code (URL, text, etc.)"),
                ),
                (
                    "size",
                    InputSpec::optional(Number, json!(300), "QR code size in pixels"),
                ),
            ]),
            Image,
        )
        .native(
            "image-resize",
            "Image Resize",
            "Resize an image by URL to the given dimensions",
            "$0.01",
            &["image", "resize", "scale", "thumbnail"],
            "/resize",
            Post,
            inputs(vec![
                ("url", InputSpec::required(Str, "URL of the image to resize")),
                ("width", InputSpec::optional(Number, json!(800), "Target width in pixels")),
                (
                    "height",
                    InputSpec::optional(Number, json!(600), "Target height in pixels"),
                ),
                (
                    "format",
                    InputSpec::optional(Str, json!("png"), "Output format: png, jpeg or webp"),
                ),
            ]),
            Image,
        )
        .native(
            "md-to-pdf",
            "Markdown to PDF",
            "Convert markdown text into a rendered PDF document",
            "$0.02",
            &["markdown", "convert", "document", "render"],
            "/convert",
            Post,
            inputs(vec![(
                "markdown",
                InputSpec::required(Str, "Markdown content to convert"),
            )]),
            Pdf,
        )
        .native(
            "html-to-pdf",
            "HTML to PDF",
            "Convert an HTML document into a rendered PDF",
            "$0.02",
            &["html", "convert", "document"],
            "/convert",
            Post,
            inputs(vec![(
                "html",
                InputSpec::required(Str, "HTML content to convert"),
            )]),
            Pdf,
        )
        .native(
            "translate",
            "Translate",
            "Translate text between languages",
            "$0.01",
            &["translate", "language", "translation"],
            "/translate",
            Post,
            inputs(vec![
                ("text", InputSpec::required(Str, "Text to translate")),
                (
                    "target",
                    InputSpec::required(Str, "Target language code (e.g. es, fr, de)"),
                ),
                (
                    "source",
                    InputSpec::optional(Str, json!("auto"), "Source language code or auto"),
                ),
            ]),
            Json,
        )
        .partner(Capability {
            id: "whois-history".to_string(),
            name: "WHOIS History".to_string(),
            description: "Historical WHOIS records for a domain".to_string(),
            cost: price("whois-history", "$0.02")?,
            keywords: vec![
                "whois".to_string(),
                "history".to_string(),
                "domain".to_string(),
                "registration".to_string(),
            ],
            endpoint: format!("{}/whois-history", backend_base.trim_end_matches('/')),
            method: HttpMethod::Get,
            inputs: inputs(vec![(
                "domain",
                InputSpec::required(ParamType::String, "Domain to look up"),
            )]),
            output: OutputKind::Json,
            tier: SourceTier::Partner,
            provider: Some(Provider {
                name: "Recon Labs".to_string(),
                payout_address: "0x8a11E22Bc1f6C3F5F3c0A5dE2c43eAb9C5d9F301".to_string(),
                contact_url: Some("https://reconlabs.example".to_string()),
            }),
            split: Some(RevenueSplit {
                provider: 0.7,
                gateway: 0.3,
            }),
            provider_cost: None,
            pay_to: None,
            network: None,
        })
        .build()
}
