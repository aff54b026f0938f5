//! Research and LegalResearch: gather documents and jurisdiction rules.
//!
//! Rules are looked up in the knowledge store first. When the store has no
//! entry, or the lookup itself fails, the built-in jurisdiction table is
//! used instead and the artifact records which source answered.

use async_trait::async_trait;
use forge_core::jurisdiction;
use serde_json::{json, Value};
use tracing::warn;

use super::Providers;
use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind, StageOutput};

const DOCUMENT_LIMIT: usize = 5;

/// Where a market's rules came from.
enum RulesLookup {
    Knowledge(Value),
    Builtin(Value),
    None,
}

impl RulesLookup {
    fn source(&self) -> &'static str {
        match self {
            RulesLookup::Knowledge(_) => "knowledge",
            RulesLookup::Builtin(_) => "builtin",
            RulesLookup::None => "none",
        }
    }

    fn into_value(self) -> Value {
        match self {
            RulesLookup::Knowledge(v) | RulesLookup::Builtin(v) => v,
            RulesLookup::None => Value::Null,
        }
    }
}

fn knowledge_key(prefix: &str, market: &str) -> String {
    let canonical = jurisdiction::lookup(market)
        .map(|j| j.market.to_string())
        .unwrap_or_else(|| market.trim().to_string());
    format!("{prefix}:{}", canonical.to_lowercase().replace(' ', "_"))
}

/// Resolve rules for `market`; pushes a warning when the store failed.
async fn lookup_rules(
    providers: &Providers,
    prefix: &str,
    market: &str,
    warnings: &mut Vec<String>,
) -> RulesLookup {
    let key = knowledge_key(prefix, market);
    let vector = providers.embedder.embed(&format!("{market} regulation"));
    match providers.knowledge.query(&vector, DOCUMENT_LIMIT).await {
        Ok(matches) => {
            if let Some(m) = matches.into_iter().find(|m| m.key == key) {
                if let Some(rules) = m.payload.get("rules").filter(|r| !r.is_null()) {
                    return RulesLookup::Knowledge(rules.clone());
                }
            }
        }
        Err(e) => {
            warn!(market = %market, error = %e, "knowledge lookup failed; using built-in rules");
            warnings.push(format!(
                "knowledge store unavailable for {market}; used built-in jurisdiction data"
            ));
        }
    }
    match jurisdiction::lookup(market) {
        Some(rules) => match serde_json::to_value(rules) {
            Ok(v) => RulesLookup::Builtin(v),
            Err(_) => RulesLookup::None,
        },
        None => RulesLookup::None,
    }
}

/// Record what was learned so the next run finds it in the store.
async fn remember(providers: &Providers, key: String, text: &str, payload: Value) {
    let vector = providers.embedder.embed(text);
    if let Err(e) = providers.knowledge.upsert(&key, vector, payload).await {
        warn!(key = %key, error = %e, "failed to store research in knowledge store");
    }
}

/// Product pipeline stage 1: market regulation and theme research.
pub struct ResearchStage {
    providers: Providers,
}

impl ResearchStage {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl Stage for ResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let target = input.request.target()?;
        let mut warnings = Vec::new();
        let mut markets = Vec::new();
        let mut fallback_used = false;

        for market in &target.target_markets {
            let documents = self
                .providers
                .research
                .search(&format!("{market} online slot regulation"), DOCUMENT_LIMIT)
                .await?;
            let rules = lookup_rules(&self.providers, "jurisdiction", market, &mut warnings).await;
            let source = rules.source();
            fallback_used |= source == "builtin";
            if source == "none" {
                warnings.push(format!("no jurisdiction rules known for market '{market}'"));
            }
            let rules = rules.into_value();

            remember(
                &self.providers,
                knowledge_key("jurisdiction", market),
                &format!("{market} regulation"),
                json!({ "market": market, "rules": rules, "documents": documents }),
            )
            .await;

            markets.push(json!({
                "market": market,
                "source": source,
                "rules": rules,
                "documents": documents,
            }));
        }

        let mut theme_query = format!("{} slot", target.theme);
        for c in &target.competitor_references {
            theme_query.push(' ');
            theme_query.push_str(c);
        }
        let theme_documents = self
            .providers
            .research
            .search(&theme_query, DOCUMENT_LIMIT)
            .await?;

        // reviewer asked for more: search on their words too
        let feedback_documents = match &input.feedback {
            Some(feedback) => match self.providers.research.search(feedback, DOCUMENT_LIMIT).await {
                Ok(docs) => docs,
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(_) => Vec::new(),
            },
            None => Vec::new(),
        };

        let binding = jurisdiction::binding_min_rtp(target.target_markets.iter().map(String::as_str))
            .map(|(market, min_rtp)| json!({ "market": market, "min_rtp": min_rtp }));

        let payload = json!({
            "theme": target.theme,
            "markets": markets,
            "binding_min_rtp": binding,
            "theme_documents": theme_documents,
            "feedback": input.feedback,
            "feedback_documents": feedback_documents,
            "fallback_used": fallback_used,
        });
        Ok(StageOutput::new(payload).with_warnings(warnings))
    }
}

/// Legal-recon stage 1: statutes and enforcement material for one jurisdiction.
pub struct LegalResearchStage {
    providers: Providers,
}

impl LegalResearchStage {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl Stage for LegalResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::LegalResearch
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let request = match &input.request {
            crate::stage::RunRequest::LegalRecon(r) => r,
            _ => {
                return Err(StageError::Validation(
                    "legal research requires a recon request".into(),
                ))
            }
        };
        let place = request.jurisdiction.trim();
        if place.is_empty() {
            return Err(StageError::Validation("jurisdiction is empty".into()));
        }

        let mut query = format!("{place} gambling law sweepstakes skill game");
        if let Some(hint) = &request.game_hint {
            query.push(' ');
            query.push_str(hint);
        }
        if let Some(feedback) = &input.feedback {
            query.push(' ');
            query.push_str(feedback);
        }
        let documents = self.providers.research.search(&query, 2 * DOCUMENT_LIMIT).await?;

        let mut warnings = Vec::new();
        let rules = lookup_rules(&self.providers, "recon", place, &mut warnings).await;
        let source = rules.source();
        let rules = rules.into_value();
        if documents.is_empty() && rules.is_null() {
            warnings.push(format!("no research material found for {place}"));
        }

        remember(
            &self.providers,
            knowledge_key("recon", place),
            &format!("{place} regulation"),
            json!({ "jurisdiction": place, "rules": rules, "documents": documents }),
        )
        .await;

        Ok(StageOutput::new(json!({
            "jurisdiction": place,
            "game_hint": request.game_hint,
            "documents": documents,
            "rules": rules,
            "source": source,
            "feedback": input.feedback,
        }))
        .with_warnings(warnings))
    }
}
