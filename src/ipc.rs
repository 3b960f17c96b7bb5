//! Line-delimited JSON commands between the dashboard and the journal.
//!
//! Each request line is `{"id": .., "command": "..", "args": {..}}` and gets
//! exactly one response line. Writes are followed by a `trades-changed`
//! event line so the dashboard can refetch its views.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::TryRecvError;

use crate::commands;
use crate::db::Database;
use crate::error::{JournalError, Result};
use crate::models::TradeForm;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct DateArgs {
    #[serde(default)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    trade: TradeForm,
}

impl Response {
    fn success(id: Value, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(id: Value, err: &JournalError) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

fn args<T: DeserializeOwned>(raw: Value) -> Result<T> {
    // A missing "args" means "no arguments", not null
    let raw = if raw.is_null() {
        Value::Object(Default::default())
    } else {
        raw
    };
    Ok(serde_json::from_value(raw)?)
}

fn execute(db: &Database, command: &str, raw_args: Value) -> Result<Value> {
    let data = match command {
        "list_trades" => {
            let a: DateArgs = args(raw_args)?;
            serde_json::to_value(commands::list_trades(db, a.date)?)
        }
        "get_trade" => {
            let a: IdArgs = args(raw_args)?;
            serde_json::to_value(commands::get_trade(db, a.id)?)
        }
        "create_trade" => {
            let a: CreateArgs = args(raw_args)?;
            serde_json::to_value(commands::create_trade(db, a.trade)?)
        }
        "daily_pnl" => serde_json::to_value(commands::daily_pnl(db)?),
        "trading_stats" => {
            let a: DateArgs = args(raw_args)?;
            serde_json::to_value(commands::trading_stats(db, a.date)?)
        }
        "audit_profit_loss" => serde_json::to_value(commands::audit_profit_loss(db)?),
        other => {
            return Err(JournalError::Validation(format!(
                "unknown command '{}'",
                other
            )))
        }
    };

    data.map_err(|e| JournalError::StoreUnavailable(format!("cannot encode response: {}", e)))
}

pub fn handle_request(db: &Database, request: Request) -> Response {
    log::debug!("Handling command {}", request.command);

    match execute(db, &request.command, request.args) {
        Ok(data) => Response::success(request.id, data),
        Err(e) => {
            log::warn!("Command {} failed: {}", request.command, e);
            Response::failure(request.id, &e)
        }
    }
}

pub fn handle_line(db: &Database, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(db, request),
        Err(e) => Response::failure(
            Value::Null,
            &JournalError::Validation(format!("malformed request: {}", e)),
        ),
    }
}

/// Serves requests from `reader` until it is exhausted
pub async fn serve<R, W>(db: &Database, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut events = db.subscribe();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(db, &line);
        write_json_line(&mut writer, &response).await?;

        loop {
            match events.try_recv() {
                Ok(event) => write_json_line(&mut writer, &event).await?,
                Err(TryRecvError::Lagged(missed)) => {
                    log::warn!("Dropped {} change events", missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        writer.flush().await?;
    }

    Ok(())
}

async fn write_json_line<W, T>(writer: &mut W, value: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_database;
    use serde_json::json;

    fn call(db: &Database, request: Value) -> Response {
        handle_line(db, &request.to_string())
    }

    #[test]
    fn test_create_then_list_over_json() {
        let db = test_database();

        let created = call(
            &db,
            json!({
                "id": 1,
                "command": "create_trade",
                "args": {"trade": {
                    "tradeDate": "2024-01-05",
                    "tradeType": "BUY",
                    "lotSize": "1",
                    "entryPrice": "150.00",
                    "exitPrice": "155.00",
                    "notes": "breakout"
                }}
            }),
        );
        assert!(created.ok, "{:?}", created.error);
        assert_eq!(created.data.as_ref().unwrap()["success"], json!(true));

        let listed = call(&db, json!({"id": 2, "command": "list_trades"}));
        let trades = listed.data.unwrap();
        assert_eq!(trades.as_array().unwrap().len(), 1);
        assert_eq!(trades[0]["profit_loss"], json!("5.00"));
        assert_eq!(trades[0]["trade_type"], json!("BUY"));
        assert_eq!(trades[0]["status"], json!("CLOSED"));
        assert_eq!(trades[0]["trade_date"], json!("2024-01-05"));
    }

    #[test]
    fn test_list_with_date_filter() {
        let db = test_database();
        let listed = call(
            &db,
            json!({"id": "a", "command": "list_trades", "args": {"date": "2024-01-05"}}),
        );
        assert!(listed.ok);
        assert_eq!(listed.id, json!("a"));
        assert_eq!(listed.data, Some(json!([])));
    }

    #[test]
    fn test_validation_error_shape() {
        let db = test_database();
        let response = call(
            &db,
            json!({"id": 3, "command": "create_trade", "args": {"trade": {"tradeType": "BUY"}}}),
        );
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, "validation");
    }

    #[test]
    fn test_unknown_trade_is_not_found() {
        let db = test_database();
        let response = call(&db, json!({"command": "get_trade", "args": {"id": 42}}));
        assert_eq!(response.error.unwrap().kind, "not_found");
    }

    #[test]
    fn test_unknown_command_and_garbage() {
        let db = test_database();
        let response = call(&db, json!({"id": 4, "command": "delete_trade"}));
        assert_eq!(response.error.unwrap().kind, "validation");

        let response = handle_line(&db, "{not json");
        assert!(!response.ok);
        assert_eq!(response.id, Value::Null);
    }

    #[tokio::test]
    async fn test_serve_emits_event_after_write() {
        let db = test_database();
        let input = concat!(
            r#"{"id":1,"command":"create_trade","args":{"trade":{"tradeDate":"2024-01-05","tradeType":"SELL","lotSize":"2","entryPrice":"100","exitPrice":"90"}}}"#,
            "\n\n",
            r#"{"id":2,"command":"daily_pnl"}"#,
            "\n"
        );

        let mut output = Vec::new();
        serve(&db, input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["ok"], json!(true));
        assert_eq!(lines[1]["event"], json!("trades-changed"));
        assert_eq!(lines[1]["data_version"], json!(1));
        assert_eq!(lines[2]["data"][0]["total_pnl"], json!("20"));
        assert_eq!(lines[2]["data"][0]["trade_count"], json!(1));
    }
}
