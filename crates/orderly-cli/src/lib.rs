//! Helpers shared by the `orderly` binary.

use anyhow::Result;
use async_trait::async_trait;
use orderly_worker::Handler;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Parse a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Handler that prints every delivered value as a JSON line on stdout.
///
/// A value equal to `fail_on` is declined, which leaves it at the head of the queue.
#[derive(Debug, Default, Clone)]
pub struct PrintHandler {
    pub fail_on: Option<Value>,
}

impl PrintHandler {
    pub fn new(fail_on: Option<Value>) -> Self {
        Self { fail_on }
    }

    fn accepts(&self, item: &Value) -> bool {
        self.fail_on.as_ref() != Some(item)
    }
}

#[async_trait]
impl Handler<Value> for PrintHandler {
    async fn handle(&self, item: &Value, _cancel: CancellationToken) -> Result<bool> {
        if !self.accepts(item) {
            tracing::warn!(value = %item, "Declining value");
            return Ok(false);
        }
        println!("{}", serde_json::json!({ "delivered": item }));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value_reads_json() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":1}"), json!({ "a": 1 }));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn test_parse_value_falls_back_to_string() {
        assert_eq!(parse_value("hello world"), json!("hello world"));
        assert_eq!(parse_value("{broken"), json!("{broken"));
    }

    #[tokio::test]
    async fn test_print_handler_declines_fail_on_value() {
        let handler = PrintHandler::new(Some(json!("poison")));
        let token = CancellationToken::new();

        assert!(!handler.handle(&json!("poison"), token.clone()).await.unwrap());
        assert!(handler.handle(&json!("fine"), token).await.unwrap());
    }
}
