//! Model catalog conversion.

use chrono::{DateTime, SecondsFormat, Utc};

use super::anthropic_types as an;
use super::canonical::{Dialect, ModelDescriptor};
use super::dispatch::DialectModelList;
use super::gemini_types as gm;
use super::openai_types as oa;

const GEMINI_NAMESPACE: &str = "models/";

pub fn ingest(list: DialectModelList) -> Vec<ModelDescriptor> {
    match list {
        DialectModelList::OpenAi(l) => l
            .data
            .into_iter()
            .map(|m| ModelDescriptor {
                id: m.id,
                created: m.created,
                owned_by: if m.owned_by.is_empty() {
                    "openai".to_string()
                } else {
                    m.owned_by
                },
            })
            .collect(),
        DialectModelList::Anthropic(l) => l
            .data
            .into_iter()
            .map(|m| ModelDescriptor {
                created: DateTime::parse_from_rfc3339(&m.created_at)
                    .map(|t| t.timestamp())
                    .unwrap_or_default(),
                id: m.id,
                owned_by: "anthropic".to_string(),
            })
            .collect(),
        DialectModelList::Gemini(l) => {
            // Gemini publishes no creation time.
            let now = Utc::now().timestamp();
            l.models
                .into_iter()
                .map(|m| ModelDescriptor {
                    id: m
                        .name
                        .strip_prefix(GEMINI_NAMESPACE)
                        .unwrap_or(&m.name)
                        .to_string(),
                    created: now,
                    owned_by: "google".to_string(),
                })
                .collect()
        }
    }
}

pub fn emit(models: Vec<ModelDescriptor>, to: Dialect) -> DialectModelList {
    match to {
        Dialect::OpenAi => DialectModelList::OpenAi(oa::ModelList {
            object: "list".to_string(),
            data: models
                .into_iter()
                .map(|m| oa::Model {
                    id: m.id,
                    object: "model".to_string(),
                    created: m.created,
                    owned_by: m.owned_by,
                })
                .collect(),
        }),
        Dialect::Anthropic => {
            let data: Vec<an::ModelInfo> = models
                .into_iter()
                .map(|m| an::ModelInfo {
                    display_name: m.id.clone(),
                    created_at: DateTime::<Utc>::from_timestamp(m.created, 0)
                        .unwrap_or_default()
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                    id: m.id,
                    model_type: "model".to_string(),
                })
                .collect();
            DialectModelList::Anthropic(an::ModelList {
                first_id: data.first().map(|m| m.id.clone()),
                last_id: data.last().map(|m| m.id.clone()),
                has_more: false,
                data,
            })
        }
        Dialect::Gemini => DialectModelList::Gemini(gm::ModelList {
            models: models
                .into_iter()
                .map(|m| gm::Model {
                    name: format!("{GEMINI_NAMESPACE}{}", m.id),
                    display_name: Some(m.id),
                    description: None,
                    input_token_limit: None,
                    output_token_limit: None,
                    supported_generation_methods: vec![
                        "generateContent".to_string(),
                        "streamGenerateContent".to_string(),
                    ],
                })
                .collect(),
            next_page_token: None,
        }),
    }
}
