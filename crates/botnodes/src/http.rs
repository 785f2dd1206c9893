use async_trait::async_trait;
use botcore::{
    to_text, ActionContext, ActionHandler, ActionKind, ActionOutcome, Map, NodeError, NodeOutput,
    Value,
};

/// HTTP request action
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestAction {
    fn default() -> Self {
        Self::new()
    }
}

fn with_body(request: reqwest::RequestBuilder, body: Option<&Value>) -> reqwest::RequestBuilder {
    match body {
        None | Some(Value::Null) => request,
        Some(Value::String(text)) => request.body(text.clone()),
        Some(json) => request.json(json),
    }
}

#[async_trait]
impl ActionHandler for HttpRequestAction {
    fn action_id(&self) -> &str {
        "http.request"
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Http
    }

    fn description(&self) -> &str {
        "Make HTTP requests"
    }

    async fn execute(&self, ctx: ActionContext) -> Result<ActionOutcome, NodeError> {
        let url = ctx.require_str("url")?;
        let method_value = ctx.get_param_or("method", Value::String("GET".to_string()));
        let method = method_value.as_str().unwrap_or("GET").to_uppercase();
        let body = ctx.params.get("body");

        let request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => with_body(self.client.post(url), body),
            "PUT" => with_body(self.client.put(url), body),
            "PATCH" => with_body(self.client.patch(url), body),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        // Add headers if provided
        let request = if let Some(Value::Object(headers)) = ctx.params.get("headers") {
            headers
                .iter()
                .fold(request, |req, (key, value)| req.header(key.as_str(), to_text(value)))
        } else {
            request
        };

        if ctx.preview {
            tracing::info!("Preview run, not sending {} {}", method, url);
            return Ok(ActionOutcome::Continue(
                NodeOutput::new()
                    .with_variable("preview", true)
                    .with_variable("url", url)
                    .with_variable("method", method),
            ));
        }

        tracing::debug!("{} {}", method, url);

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: Map = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        tracing::debug!("Response status: {}", status);

        let mut output = NodeOutput::new()
            .with_variable("status", status)
            .with_variable("ok", (200..300).contains(&status))
            .with_variable("body", body_text.clone())
            .with_variable("headers", Value::Object(headers));
        if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
            output = output.with_variable("json", json);
        }

        let fail_on_status = ctx
            .params
            .get("fail_on_status")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if fail_on_status && !(200..300).contains(&status) {
            return Err(NodeError::ExecutionFailed(format!(
                "{} {} returned status {}",
                method, url, status
            )));
        }

        Ok(ActionOutcome::Continue(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context as ctx;
    use serde_json::json;

    #[tokio::test]
    async fn requires_url() {
        let err = HttpRequestAction::new()
            .execute(ctx(json!({"method": "GET"})))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::MissingInput("url".into()));
    }

    #[tokio::test]
    async fn rejects_unknown_method() {
        let err = HttpRequestAction::new()
            .execute(ctx(json!({"url": "http://localhost", "method": "TRACE"})))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::Configuration("Unsupported method: TRACE".into()));
    }

    #[tokio::test]
    async fn preview_does_not_send() {
        let mut context = ctx(json!({"url": "http://localhost:9/never", "method": "post", "body": {"a": 1}}));
        context.preview = true;
        let outcome = HttpRequestAction::new().execute(context).await.unwrap();
        let vars = &outcome.output().unwrap().variables;
        assert_eq!(vars["preview"], json!(true));
        assert_eq!(vars["method"], json!("POST"));
    }
}
