//! MCP resources synthesized from the instance store, under the `odoo://`
//! scheme:
//! - `odoo://instances` — the configured instance names
//! - `odoo://{instance}/models` — model listing for one instance
//! - `odoo://{instance}/metadata/{model}` — field metadata (cache-backed)

use serde_json::{Value, json};

use crate::error::{ServerError, ServerResult};
use crate::odoo::pool::ClientPool;
use crate::ops;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Instances,
    Models { instance: String },
    Metadata { instance: String, model: String },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> ServerResult<Self> {
        let path = uri.strip_prefix("odoo://").ok_or_else(|| {
            ServerError::invalid_arguments(format!(
                "invalid URI scheme, expected 'odoo://': {uri}"
            ))
        })?;

        if path == "instances" {
            return Ok(ResourceUri::Instances);
        }

        match path.split_once('/') {
            Some((instance, "models")) if !instance.is_empty() => Ok(ResourceUri::Models {
                instance: instance.to_string(),
            }),
            Some((instance, rest)) if !instance.is_empty() => {
                if let Some(model) = rest.strip_prefix("metadata/")
                    && !model.is_empty()
                {
                    Ok(ResourceUri::Metadata {
                        instance: instance.to_string(),
                        model: model.to_string(),
                    })
                } else {
                    Err(ServerError::invalid_arguments(format!(
                        "invalid resource URI: {uri}"
                    )))
                }
            }
            _ => Err(ServerError::invalid_arguments(format!(
                "invalid resource URI: {uri}"
            ))),
        }
    }

    pub fn to_uri(&self) -> String {
        match self {
            ResourceUri::Instances => "odoo://instances".to_string(),
            ResourceUri::Models { instance } => format!("odoo://{instance}/models"),
            ResourceUri::Metadata { instance, model } => {
                format!("odoo://{instance}/metadata/{model}")
            }
        }
    }
}

pub async fn list_resources(pool: &ClientPool) -> ServerResult<Value> {
    let mut resources = vec![json!({
        "uri": "odoo://instances",
        "name": "Odoo Instances",
        "description": "List of configured Odoo instances",
        "mimeType": "application/json"
    })];

    for instance in pool.instance_names().await {
        resources.push(json!({
            "uri": format!("odoo://{instance}/models"),
            "name": format!("Models in {instance}"),
            "description": format!("Models accessible in Odoo instance '{instance}'"),
            "mimeType": "application/json"
        }));
    }

    Ok(json!({ "resources": resources }))
}

pub async fn read_resource(pool: &ClientPool, uri: &str) -> ServerResult<Value> {
    let parsed = ResourceUri::parse(uri)?;
    let body = match &parsed {
        ResourceUri::Instances => {
            let names = pool.instance_names().await;
            json!(names.iter().map(|n| json!({"name": n})).collect::<Vec<_>>())
        }
        ResourceUri::Models { instance } => {
            let client = pool.get(instance).await?;
            client
                .search_read(
                    "ir.model",
                    Some(json!([])),
                    Some(vec!["model".to_string(), "name".to_string()]),
                    None,
                    None,
                    Some("model".to_string()),
                    None,
                )
                .await?
        }
        ResourceUri::Metadata { instance, model } => {
            let metadata = ops::model_metadata(pool, instance, model, None).await?;
            json!({ "model": metadata })
        }
    };

    Ok(json!({
        "contents": [{
            "uri": parsed.to_uri(),
            "mimeType": "application/json",
            "text": serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string())
        }]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_forms() {
        assert_eq!(
            ResourceUri::parse("odoo://instances").unwrap(),
            ResourceUri::Instances
        );
        assert_eq!(
            ResourceUri::parse("odoo://prod/models").unwrap(),
            ResourceUri::Models {
                instance: "prod".to_string()
            }
        );
        assert_eq!(
            ResourceUri::parse("odoo://prod/metadata/sale.order").unwrap(),
            ResourceUri::Metadata {
                instance: "prod".to_string(),
                model: "sale.order".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_uris() {
        for uri in [
            "http://example.com",
            "odoo://",
            "odoo://prod",
            "odoo://prod/unknown",
            "odoo://prod/metadata/",
            "odoo://prod/models/extra",
        ] {
            let err = ResourceUri::parse(uri).unwrap_err();
            assert_eq!(err.code(), -32602, "{uri}");
        }
    }

    #[test]
    fn round_trips() {
        for uri in [
            "odoo://instances",
            "odoo://prod-db/models",
            "odoo://staging/metadata/account.move.line",
        ] {
            assert_eq!(ResourceUri::parse(uri).unwrap().to_uri(), uri);
        }
    }
}
