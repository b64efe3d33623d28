use forge_harness::{ModelRef, ProviderId};
use serde::Serialize;

/// Predicate over the raw model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelMatcher {
    /// Any of the prefixes.
    Prefix(Vec<&'static str>),
    Any,
}

impl ModelMatcher {
    pub fn prefix(prefix: &'static str) -> Self {
        ModelMatcher::Prefix(vec![prefix])
    }

    fn matches(&self, model_id: &str) -> bool {
        match self {
            ModelMatcher::Prefix(prefixes) => prefixes.iter().any(|p| model_id.starts_with(p)),
            ModelMatcher::Any => true,
        }
    }
}

/// How the backend model name is derived from the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTransform {
    Unchanged,
    StripPrefix(&'static str),
}

impl NameTransform {
    fn apply(&self, model_id: &str) -> String {
        match self {
            NameTransform::Unchanged => model_id.to_string(),
            NameTransform::StripPrefix(prefix) => model_id
                .strip_prefix(prefix)
                .unwrap_or(model_id)
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub name: &'static str,
    pub matcher: ModelMatcher,
    pub backend: ProviderId,
    pub transform: NameTransform,
    /// Backend and model used for the final retry.
    pub fallback: Option<ModelRef>,
}

impl RouteRule {
    pub fn new(name: &'static str, matcher: ModelMatcher, backend: &str) -> Self {
        Self {
            name,
            matcher,
            backend: ProviderId::new(backend),
            transform: NameTransform::Unchanged,
            fallback: None,
        }
    }

    pub fn strip(mut self, prefix: &'static str) -> Self {
        self.transform = NameTransform::StripPrefix(prefix);
        self
    }

    pub fn fallback(mut self, backend: &str, model: &str) -> Self {
        self.fallback = Some(ModelRef::new(backend, model));
        self
    }
}

/// Outcome of resolving a model id. Recomputed per call, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRoute {
    pub model_id: String,
    pub backend: ProviderId,
    pub normalized_model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ModelRef>,
    pub rule: &'static str,
}

impl ProviderRoute {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(self.backend.clone(), self.normalized_model_name.clone())
    }
}

/// Ordered rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The built-in routing. The `gemini-` rule exists only when the Gemini
    /// Code Assist backend is configured.
    pub fn default_table(gemini_configured: bool) -> Self {
        let mut rules = vec![RouteRule::new("anthropic", ModelMatcher::prefix("anthropic/"), "anthropic").strip("anthropic/")];
        if gemini_configured {
            rules.push(RouteRule::new(
                "gemini-code-assist",
                ModelMatcher::prefix("gemini-"),
                "gemini-gca",
            ));
        }
        rules.extend([
            RouteRule::new(
                "kimi",
                ModelMatcher::Prefix(vec!["moonshotai/", "kimi-"]),
                "groq",
            )
            .fallback("openai", "gpt-4-turbo"),
            RouteRule::new(
                "qiniu-native",
                ModelMatcher::Prefix(vec!["qwen", "deepseek", "glm-", "qwq-", "gpt-oss"]),
                "qiniu",
            ),
            RouteRule::new("openai", ModelMatcher::prefix("openai/"), "openai").strip("openai/"),
            RouteRule::new("google", ModelMatcher::prefix("google/"), "google").strip("google/"),
            RouteRule::new("default", ModelMatcher::Any, "qiniu"),
        ]);
        Self { rules }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn resolve(&self, model_id: &str) -> Option<ProviderRoute> {
        let model_id = model_id.trim();
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(model_id))
            .map(|rule| ProviderRoute {
                model_id: model_id.to_string(),
                backend: rule.backend.clone(),
                normalized_model_name: rule.transform.apply(model_id),
                fallback: rule.fallback.clone(),
                rule: rule.name,
            })
    }
}
