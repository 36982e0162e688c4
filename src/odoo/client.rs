use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::descriptor::{InstanceDescriptor, OdooProtocol};
use super::legacy::LegacyClient;
use super::modern::ModernClient;
use super::types::{OdooError, OdooResult};

/// Capability set every Odoo client variant provides. The trait exists as a
/// mocking seam; production code goes through the [`OdooClient`] enum.
#[async_trait]
pub trait OdooApi: Send + Sync {
    async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn search(
        &self,
        model: &str,
        domain: Option<Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Vec<i64>>;

    async fn search_read(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Option<Vec<String>>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn read(
        &self,
        model: &str,
        ids: Vec<i64>,
        fields: Option<Vec<String>>,
        context: Option<Value>,
    ) -> OdooResult<Value>;

    async fn create(&self, model: &str, values: Value, context: Option<Value>) -> OdooResult<i64>;

    async fn write(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        context: Option<Value>,
    ) -> OdooResult<bool>;

    async fn unlink(&self, model: &str, ids: Vec<i64>, context: Option<Value>) -> OdooResult<bool>;

    async fn search_count(
        &self,
        model: &str,
        domain: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64>;

    async fn fields_get(&self, model: &str, context: Option<Value>) -> OdooResult<Value>;

    async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>>;
}

/// One client per configured instance, speaking whichever of the two Odoo
/// protocols the descriptor selects. Both variants take positional `args`
/// plus a `kwargs` map, so the primitives below shape calls once.
#[derive(Clone)]
pub enum OdooClient {
    Modern(ModernClient),
    Legacy(LegacyClient),
}

fn expect_i64(v: Value, what: &str) -> OdooResult<i64> {
    // create/copy answer a bare id on the legacy surface and `[id]` on the
    // modern one.
    if let Some(arr) = v.as_array() {
        return arr
            .first()
            .and_then(|x| x.as_i64())
            .ok_or_else(|| OdooError::InvalidResponse(format!("Expected id from {what}, got: {v}")));
    }
    v.as_i64()
        .ok_or_else(|| OdooError::InvalidResponse(format!("Expected number from {what}, got: {v}")))
}

fn expect_bool(v: Value, what: &str) -> OdooResult<bool> {
    v.as_bool()
        .ok_or_else(|| OdooError::InvalidResponse(format!("Expected boolean from {what}, got: {v}")))
}

impl OdooClient {
    /// Build the variant the descriptor calls for.
    pub fn connect(desc: &InstanceDescriptor) -> anyhow::Result<Self> {
        match desc.select_protocol()? {
            OdooProtocol::Modern => Ok(OdooClient::Modern(ModernClient::new(desc)?)),
            OdooProtocol::Legacy => Ok(OdooClient::Legacy(LegacyClient::new(desc)?)),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, OdooClient::Legacy(_))
    }

    pub async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        match self {
            OdooClient::Modern(c) => c.call(model, method, args, kwargs, context).await,
            OdooClient::Legacy(c) => c.call(model, method, args, kwargs, context).await,
        }
    }

    pub async fn search(
        &self,
        model: &str,
        domain: Option<Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Vec<i64>> {
        let mut kwargs = Map::new();
        if let Some(v) = limit {
            kwargs.insert("limit".to_string(), json!(v));
        }
        if let Some(v) = offset {
            kwargs.insert("offset".to_string(), json!(v));
        }
        if let Some(v) = order {
            kwargs.insert("order".to_string(), json!(v));
        }
        let v = self
            .call(
                model,
                "search",
                vec![domain.unwrap_or_else(|| json!([]))],
                kwargs,
                context,
            )
            .await?;
        serde_json::from_value(v).map_err(|e| {
            OdooError::InvalidResponse(format!("Expected array of ids from search: {e}"))
        })
    }

    pub async fn search_read(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Option<Vec<String>>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        if let Some(v) = fields {
            kwargs.insert("fields".to_string(), json!(v));
        }
        if let Some(v) = limit {
            kwargs.insert("limit".to_string(), json!(v));
        }
        if let Some(v) = offset {
            kwargs.insert("offset".to_string(), json!(v));
        }
        if let Some(v) = order {
            kwargs.insert("order".to_string(), json!(v));
        }
        self.call(
            model,
            "search_read",
            vec![domain.unwrap_or_else(|| json!([]))],
            kwargs,
            context,
        )
        .await
    }

    pub async fn read(
        &self,
        model: &str,
        ids: Vec<i64>,
        fields: Option<Vec<String>>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        if let Some(v) = fields {
            kwargs.insert("fields".to_string(), json!(v));
        }
        self.call(model, "read", vec![json!(ids)], kwargs, context)
            .await
    }

    pub async fn create(
        &self,
        model: &str,
        values: Value,
        context: Option<Value>,
    ) -> OdooResult<i64> {
        // Odoo's signature is create(vals_list); accept a single object too.
        let vals_list = if values.is_array() {
            values
        } else {
            json!([values])
        };
        let v = self
            .call(model, "create", vec![vals_list], Map::new(), context)
            .await?;
        expect_i64(v, "create")
    }

    pub async fn write(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        context: Option<Value>,
    ) -> OdooResult<bool> {
        let v = self
            .call(model, "write", vec![json!(ids), values], Map::new(), context)
            .await?;
        expect_bool(v, "write")
    }

    pub async fn unlink(
        &self,
        model: &str,
        ids: Vec<i64>,
        context: Option<Value>,
    ) -> OdooResult<bool> {
        let v = self
            .call(model, "unlink", vec![json!(ids)], Map::new(), context)
            .await?;
        expect_bool(v, "unlink")
    }

    pub async fn search_count(
        &self,
        model: &str,
        domain: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64> {
        let v = self
            .call(
                model,
                "search_count",
                vec![domain.unwrap_or_else(|| json!([]))],
                Map::new(),
                context,
            )
            .await?;
        v.as_i64().ok_or_else(|| {
            OdooError::InvalidResponse(format!("Expected count from search_count, got: {v}"))
        })
    }

    pub async fn fields_get(&self, model: &str, context: Option<Value>) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        kwargs.insert(
            "attributes".to_string(),
            json!(["string", "type", "help", "required", "readonly", "relation", "selection"]),
        );
        self.call(model, "fields_get", vec![], kwargs, context).await
    }

    pub async fn name_search(
        &self,
        model: &str,
        name: Option<String>,
        args: Option<Value>,
        operator: Option<String>,
        limit: Option<i64>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        if let Some(a) = args {
            kwargs.insert("args".to_string(), a);
        }
        if let Some(op) = operator {
            kwargs.insert("operator".to_string(), json!(op));
        }
        if let Some(l) = limit {
            kwargs.insert("limit".to_string(), json!(l));
        }
        self.call(
            model,
            "name_search",
            vec![json!(name.unwrap_or_default())],
            kwargs,
            context,
        )
        .await
    }

    pub async fn name_get(
        &self,
        model: &str,
        ids: Vec<i64>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        self.call(model, "name_get", vec![json!(ids)], Map::new(), context)
            .await
    }

    pub async fn default_get(
        &self,
        model: &str,
        fields_list: Vec<String>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        self.call(
            model,
            "default_get",
            vec![json!(fields_list)],
            Map::new(),
            context,
        )
        .await
    }

    pub async fn read_group(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Vec<String>,
        groupby: Vec<String>,
        offset: Option<i64>,
        limit: Option<i64>,
        orderby: Option<String>,
        lazy: Option<bool>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        let mut kwargs = Map::new();
        if let Some(v) = offset {
            kwargs.insert("offset".to_string(), json!(v));
        }
        if let Some(v) = limit {
            kwargs.insert("limit".to_string(), json!(v));
        }
        if let Some(v) = orderby {
            kwargs.insert("orderby".to_string(), json!(v));
        }
        if let Some(v) = lazy {
            kwargs.insert("lazy".to_string(), json!(v));
        }
        self.call(
            model,
            "read_group",
            vec![
                domain.unwrap_or_else(|| json!([])),
                json!(fields),
                json!(groupby),
            ],
            kwargs,
            context,
        )
        .await
    }

    pub async fn copy(
        &self,
        model: &str,
        id: i64,
        default: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64> {
        let mut kwargs = Map::new();
        if let Some(d) = default {
            kwargs.insert("default".to_string(), d);
        }
        let v = self
            .call(model, "copy", vec![json!([id])], kwargs, context)
            .await?;
        expect_i64(v, "copy")
    }

    pub async fn onchange(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        field_name: Vec<String>,
        field_onchange: Value,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        self.call(
            model,
            "onchange",
            vec![json!(ids), values, json!(field_name), field_onchange],
            Map::new(),
            context,
        )
        .await
    }

    /// Combined `check_access_rights` + `check_access_rule` probe. Odoo
    /// signalling access refusal through the rule check comes back as
    /// `allowed: false`, not an error.
    pub async fn check_access(
        &self,
        model: &str,
        operation: &str,
        ids: Option<Vec<i64>>,
        context: Option<Value>,
    ) -> OdooResult<bool> {
        let mut kwargs = Map::new();
        kwargs.insert("operation".to_string(), json!(operation));
        kwargs.insert("raise_exception".to_string(), json!(false));
        let rights = self
            .call(model, "check_access_rights", vec![], kwargs, context.clone())
            .await?;
        if !rights.as_bool().unwrap_or(false) {
            return Ok(false);
        }

        let Some(ids) = ids.filter(|v| !v.is_empty()) else {
            return Ok(true);
        };
        let mut kwargs = Map::new();
        kwargs.insert("operation".to_string(), json!(operation));
        match self
            .call(model, "check_access_rule", vec![json!(ids)], kwargs, context)
            .await
        {
            Ok(_) => Ok(true),
            Err(OdooError::AccessDenied(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        match self {
            OdooClient::Modern(c) => c.download_report_pdf(report_name, ids).await,
            OdooClient::Legacy(c) => c.download_report_pdf(report_name, ids).await,
        }
    }

    /// Cheap reachability probe (used by `validate-config`).
    pub async fn health_check(&self) -> bool {
        self.search_count("ir.model", Some(json!([])), None)
            .await
            .is_ok()
    }
}

#[async_trait]
impl OdooApi for OdooClient {
    async fn call(
        &self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        OdooClient::call(self, model, method, args, kwargs, context).await
    }

    async fn search(
        &self,
        model: &str,
        domain: Option<Value>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Vec<i64>> {
        OdooClient::search(self, model, domain, limit, offset, order, context).await
    }

    async fn search_read(
        &self,
        model: &str,
        domain: Option<Value>,
        fields: Option<Vec<String>>,
        limit: Option<i64>,
        offset: Option<i64>,
        order: Option<String>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        OdooClient::search_read(self, model, domain, fields, limit, offset, order, context).await
    }

    async fn read(
        &self,
        model: &str,
        ids: Vec<i64>,
        fields: Option<Vec<String>>,
        context: Option<Value>,
    ) -> OdooResult<Value> {
        OdooClient::read(self, model, ids, fields, context).await
    }

    async fn create(&self, model: &str, values: Value, context: Option<Value>) -> OdooResult<i64> {
        OdooClient::create(self, model, values, context).await
    }

    async fn write(
        &self,
        model: &str,
        ids: Vec<i64>,
        values: Value,
        context: Option<Value>,
    ) -> OdooResult<bool> {
        OdooClient::write(self, model, ids, values, context).await
    }

    async fn unlink(&self, model: &str, ids: Vec<i64>, context: Option<Value>) -> OdooResult<bool> {
        OdooClient::unlink(self, model, ids, context).await
    }

    async fn search_count(
        &self,
        model: &str,
        domain: Option<Value>,
        context: Option<Value>,
    ) -> OdooResult<i64> {
        OdooClient::search_count(self, model, domain, context).await
    }

    async fn fields_get(&self, model: &str, context: Option<Value>) -> OdooResult<Value> {
        OdooClient::fields_get(self, model, context).await
    }

    async fn download_report_pdf(&self, report_name: &str, ids: &[i64]) -> OdooResult<Vec<u8>> {
        OdooClient::download_report_pdf(self, report_name, ids).await
    }
}
