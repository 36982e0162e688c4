pub mod args;
pub mod cleanup;

use serde_json::{Map, Value, json};

use crate::error::{ServerError, ServerResult};
use crate::odoo::pool::ClientPool;
use crate::registry::{OpSpec, ToolSpec, env_is_true};

use args::ArgMap;

/// The closed set of operation discriminators a tool's `op.type` may use.
pub const OP_KINDS: &[&str] = &[
    "search",
    "search_read",
    "read",
    "create",
    "write",
    "unlink",
    "search_count",
    "execute",
    "workflow_action",
    "generate_report",
    "get_model_metadata",
    "list_models",
    "check_access",
    "create_batch",
    "read_group",
    "name_search",
    "name_get",
    "default_get",
    "copy",
    "onchange",
    "database_cleanup",
    "deep_cleanup",
];

pub const CLEANUP_GUARD_VAR: &str = "ODOO_ENABLE_CLEANUP_TOOLS";

/// Largest batch `create_batch` will fan out.
pub const CREATE_BATCH_CAP: usize = 100;

/// Wrap a handler result as a single MCP text content block carrying the
/// compact JSON encoding of the result shape.
fn content(payload: Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string())
        }]
    })
}

pub async fn call_tool(pool: &ClientPool, tool: &ToolSpec, args: Value) -> ServerResult<Value> {
    execute_op(pool, &tool.op, args).await
}

pub async fn execute_op(pool: &ClientPool, op: &OpSpec, args: Value) -> ServerResult<Value> {
    let a = ArgMap::new(&op.map, &args);
    match op.kind.as_str() {
        "search" => op_search(pool, &a).await,
        "search_read" => op_search_read(pool, &a).await,
        "read" => op_read(pool, &a).await,
        "create" => op_create(pool, &a).await,
        "write" => op_write(pool, &a).await,
        "unlink" => op_unlink(pool, &a).await,
        "search_count" => op_search_count(pool, &a).await,
        "execute" => op_execute(pool, &a).await,
        "workflow_action" => op_workflow_action(pool, &a).await,
        "generate_report" => op_generate_report(pool, &a).await,
        "get_model_metadata" => op_get_model_metadata(pool, &a).await,
        "list_models" => op_list_models(pool, &a).await,
        "check_access" => op_check_access(pool, &a).await,
        "create_batch" => op_create_batch(pool, &a).await,
        "read_group" => op_read_group(pool, &a).await,
        "name_search" => op_name_search(pool, &a).await,
        "name_get" => op_name_get(pool, &a).await,
        "default_get" => op_default_get(pool, &a).await,
        "copy" => op_copy(pool, &a).await,
        "onchange" => op_onchange(pool, &a).await,
        "database_cleanup" => op_database_cleanup(pool, &a).await,
        "deep_cleanup" => op_deep_cleanup(pool, &a).await,
        other => Err(ServerError::internal(format!("unknown op.type: {other}"))),
    }
}

async fn op_search(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let client = pool.get(&instance).await?;

    let ids = client
        .search(
            &model,
            a.opt_value("domain"),
            a.opt_i64("limit")?,
            a.opt_i64("offset")?,
            a.opt_str("order")?,
            a.opt_value("context"),
        )
        .await?;
    Ok(content(json!({ "ids": ids, "count": ids.len() })))
}

async fn op_search_read(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let client = pool.get(&instance).await?;

    let records = client
        .search_read(
            &model,
            a.opt_value("domain"),
            a.opt_str_vec("fields")?,
            a.opt_i64("limit")?,
            a.opt_i64("offset")?,
            a.opt_str("order")?,
            a.opt_value("context"),
        )
        .await?;
    let count = records.as_array().map(|r| r.len()).unwrap_or(0);
    Ok(content(json!({ "records": records, "count": count })))
}

async fn op_read(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let ids = a.req_i64_vec("ids")?;
    let client = pool.get(&instance).await?;

    let records = client
        .read(&model, ids, a.opt_str_vec("fields")?, a.opt_value("context"))
        .await?;
    Ok(content(json!({ "records": records })))
}

async fn op_create(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let values = a.req_value("values")?;
    let client = pool.get(&instance).await?;

    let id = client.create(&model, values, a.opt_value("context")).await?;
    Ok(content(json!({ "id": id, "success": true })))
}

async fn op_write(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let ids = a.req_i64_vec("ids")?;
    let values = a.req_value("values")?;
    let client = pool.get(&instance).await?;

    let ok = client
        .write(&model, ids.clone(), values, a.opt_value("context"))
        .await?;
    Ok(content(json!({ "success": ok, "updated_count": ids.len() })))
}

async fn op_unlink(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let ids = a.req_i64_vec("ids")?;
    let client = pool.get(&instance).await?;

    let ok = client
        .unlink(&model, ids.clone(), a.opt_value("context"))
        .await?;
    Ok(content(json!({ "success": ok, "deleted_count": ids.len() })))
}

async fn op_search_count(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let client = pool.get(&instance).await?;

    let count = client
        .search_count(&model, a.opt_value("domain"), a.opt_value("context"))
        .await?;
    Ok(content(json!({ "count": count })))
}

async fn op_execute(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let method = a.req_str("method")?;
    let client = pool.get(&instance).await?;

    let mut call_args: Vec<Value> = match a.opt_value("args") {
        Some(Value::Array(arr)) => arr,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    if let Some(ids) = a.opt_value("ids").filter(|v| v.is_array()) {
        call_args.insert(0, ids);
    }
    let kwargs: Map<String, Value> = match a.opt_value("kwargs") {
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(ServerError::invalid_arguments(
                "argument 'kwargs' must be an object",
            ));
        }
        None => Map::new(),
    };

    let result = client
        .call(&model, &method, call_args, kwargs, a.opt_value("context"))
        .await?;
    Ok(content(json!({ "result": result })))
}

async fn op_workflow_action(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let ids = a.req_i64_vec("ids")?;
    let action = a.req_str("action")?;
    let client = pool.get(&instance).await?;

    let result = client
        .call(
            &model,
            &action,
            vec![json!(ids)],
            Map::new(),
            a.opt_value("context"),
        )
        .await?;
    Ok(content(json!({ "result": result, "executed_on": ids })))
}

async fn op_generate_report(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    use base64::Engine;

    let instance = a.req_str("instance")?;
    let report_name = a.req_str("report_name")?;
    let ids = a.req_i64_vec("ids")?;
    let client = pool.get(&instance).await?;

    let pdf = client.download_report_pdf(&report_name, &ids).await?;
    let pdf_base64 = base64::engine::general_purpose::STANDARD.encode(pdf);
    Ok(content(json!({
        "pdf_base64": pdf_base64,
        "report_name": report_name,
        "record_ids": ids
    })))
}

/// Field metadata is served through the TTL cache; a hit issues no upstream
/// call at all. Shared with the `odoo://{instance}/metadata/{model}` resource.
pub async fn model_metadata(
    pool: &ClientPool,
    instance: &str,
    model: &str,
    context: Option<Value>,
) -> ServerResult<Value> {
    if let Some(cached) = pool.cache().get(instance, model).await {
        return Ok(cached);
    }

    let client = pool.get(instance).await?;
    let fields = client.fields_get(model, context.clone()).await?;

    let info = client
        .search_read(
            "ir.model",
            Some(json!([["model", "=", model]])),
            Some(vec!["name".to_string(), "model".to_string()]),
            Some(1),
            None,
            None,
            context,
        )
        .await?;
    let description = info
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|o| o.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or(model)
        .to_string();

    let metadata = json!({
        "name": model,
        "description": description,
        "fields": fields
    });
    pool.cache().insert(instance, model, metadata.clone()).await;
    Ok(metadata)
}

async fn op_get_model_metadata(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let metadata = model_metadata(pool, &instance, &model, a.opt_value("context")).await?;
    Ok(content(json!({ "model": metadata })))
}

async fn op_list_models(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let client = pool.get(&instance).await?;

    let records = client
        .search_read(
            "ir.model",
            a.opt_value("domain"),
            Some(vec!["model".to_string(), "name".to_string()]),
            a.opt_i64("limit")?,
            a.opt_i64("offset")?,
            Some("model".to_string()),
            a.opt_value("context"),
        )
        .await?;
    let count = records.as_array().map(|r| r.len()).unwrap_or(0);
    Ok(content(json!({ "records": records, "count": count })))
}

async fn op_check_access(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let operation = a.opt_str("operation")?.unwrap_or_else(|| "read".to_string());
    let ids = match a.opt_value("ids") {
        Some(_) => Some(a.req_i64_vec("ids")?),
        None => None,
    };
    let client = pool.get(&instance).await?;

    let allowed = client
        .check_access(&model, &operation, ids, a.opt_value("context"))
        .await?;
    Ok(content(json!({ "allowed": allowed, "operation": operation })))
}

async fn op_create_batch(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let records = a.req_value("records")?;
    let records = records
        .as_array()
        .ok_or_else(|| ServerError::invalid_arguments("argument 'records' must be an array"))?
        .clone();
    if records.is_empty() {
        return Err(ServerError::invalid_arguments(
            "argument 'records' must not be empty",
        ));
    }
    if records.len() > CREATE_BATCH_CAP {
        return Err(ServerError::invalid_arguments(format!(
            "argument 'records' exceeds the batch cap of {CREATE_BATCH_CAP}"
        )));
    }

    let client = pool.get(&instance).await?;
    let context = a.opt_value("context");
    let mut ids = Vec::with_capacity(records.len());
    for values in records {
        let id = client.create(&model, values, context.clone()).await?;
        ids.push(id);
    }
    Ok(content(
        json!({ "ids": ids, "created_count": ids.len() }),
    ))
}

async fn op_read_group(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let client = pool.get(&instance).await?;

    let groups = client
        .read_group(
            &model,
            a.opt_value("domain"),
            a.opt_str_vec("fields")?.unwrap_or_default(),
            a.opt_str_vec("groupby")?.unwrap_or_default(),
            a.opt_i64("offset")?,
            a.opt_i64("limit")?,
            a.opt_str("orderby")?,
            a.opt_bool("lazy")?,
            a.opt_value("context"),
        )
        .await?;
    Ok(content(json!({ "groups": groups })))
}

async fn op_name_search(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let client = pool.get(&instance).await?;

    let records = client
        .name_search(
            &model,
            a.opt_str("name")?,
            a.opt_value("args"),
            a.opt_str("operator")?,
            a.opt_i64("limit")?,
            a.opt_value("context"),
        )
        .await?;
    Ok(content(json!({ "records": records })))
}

async fn op_name_get(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let ids = a.req_i64_vec("ids")?;
    let client = pool.get(&instance).await?;

    let records = client.name_get(&model, ids, a.opt_value("context")).await?;
    Ok(content(json!({ "records": records })))
}

async fn op_default_get(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let fields = a.opt_str_vec("fields")?.unwrap_or_default();
    let client = pool.get(&instance).await?;

    let defaults = client
        .default_get(&model, fields, a.opt_value("context"))
        .await?;
    Ok(content(json!({ "defaults": defaults })))
}

async fn op_copy(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let id = a.req_i64("id")?;
    let client = pool.get(&instance).await?;

    let new_id = client
        .copy(&model, id, a.opt_value("default"), a.opt_value("context"))
        .await?;
    Ok(content(json!({ "id": new_id, "success": true })))
}

async fn op_onchange(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    let instance = a.req_str("instance")?;
    let model = a.req_str("model")?;
    let ids = a.req_i64_vec("ids")?;
    let values = a.req_value("values")?;
    let field_name = a.opt_str_vec("field_name")?.unwrap_or_default();
    let field_onchange = a.opt_value("field_onchange").unwrap_or_else(|| json!({}));
    let client = pool.get(&instance).await?;

    let result = client
        .onchange(
            &model,
            ids,
            values,
            field_name,
            field_onchange,
            a.opt_value("context"),
        )
        .await?;

    // Odoo answers {value, warning?, domain?}; pass those through as-is.
    let mut payload = Map::new();
    match result {
        Value::Object(obj) => {
            payload.insert(
                "value".to_string(),
                obj.get("value").cloned().unwrap_or_else(|| json!({})),
            );
            if let Some(w) = obj.get("warning").filter(|v| !v.is_null()) {
                payload.insert("warning".to_string(), w.clone());
            }
            if let Some(d) = obj.get("domain").filter(|v| !v.is_null()) {
                payload.insert("domain".to_string(), d.clone());
            }
        }
        other => {
            payload.insert("value".to_string(), other);
        }
    }
    Ok(content(Value::Object(payload)))
}

fn cleanup_guard() -> ServerResult<()> {
    if env_is_true(CLEANUP_GUARD_VAR) {
        Ok(())
    } else {
        Err(ServerError::OperationDisabled(format!(
            "cleanup operations require {CLEANUP_GUARD_VAR}=true"
        )))
    }
}

async fn op_database_cleanup(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    cleanup_guard()?;
    let instance = a.req_str("instance")?;
    let client = pool.get(&instance).await?;

    let options = cleanup::CleanupOptions {
        remove_test_data: a.opt_bool("remove_test_data")?,
        remove_inactive_records: a.opt_bool("remove_inactive_records")?,
        cleanup_drafts: a.opt_bool("cleanup_drafts")?,
        days_threshold: a.opt_i64("days_threshold")?,
        dry_run: a.opt_bool("dry_run")?,
    };
    let report = cleanup::database_cleanup(&client, options).await?;
    let v = serde_json::to_value(&report)
        .map_err(|e| ServerError::internal(format!("failed to encode cleanup report: {e}")))?;
    Ok(content(v))
}

async fn op_deep_cleanup(pool: &ClientPool, a: &ArgMap<'_>) -> ServerResult<Value> {
    cleanup_guard()?;
    let instance = a.req_str("instance")?;
    let client = pool.get(&instance).await?;

    let options = cleanup::DeepCleanupOptions {
        dry_run: a.opt_bool("dry_run")?,
        keep_company_defaults: a.opt_bool("keep_company_defaults")?,
        keep_user_accounts: a.opt_bool("keep_user_accounts")?,
        keep_menus: a.opt_bool("keep_menus")?,
        keep_groups: a.opt_bool("keep_groups")?,
    };
    let report = cleanup::deep_cleanup(&client, options).await?;
    let v = serde_json::to_value(&report)
        .map_err(|e| ServerError::internal(format!("failed to encode cleanup report: {e}")))?;
    Ok(content(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_kinds_is_the_full_closed_set() {
        assert_eq!(OP_KINDS.len(), 22);
        for kind in OP_KINDS {
            assert!(!kind.is_empty());
        }
    }

    #[test]
    fn content_wraps_compact_json() {
        let v = content(json!({"count": 3}));
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][0]["text"], "{\"count\":3}");
    }

    #[test]
    fn cleanup_guard_requires_env() {
        unsafe {
            std::env::remove_var(CLEANUP_GUARD_VAR);
        }
        let err = cleanup_guard().unwrap_err();
        assert_eq!(err.code(), -32003);
    }
}
