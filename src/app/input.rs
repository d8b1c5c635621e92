use crate::domain::{AgentEvent, LifecycleSignal, Message, Record};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Visibility {
    Hidden,
    Visible,
}

/// One line of the capture protocol.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Command {
    Log { message: Message },
    Rum { message: Message },
    RumUpdate { key: String, message: Message },
    Record { record: Record },
    Session { id: Option<String> },
    ViewCreated { id: Option<String> },
    ViewEnded { timestamp: Option<i64> },
    Visibility { state: Visibility },
    BeforeUnload,
}

impl Command {
    fn into_event(self) -> AgentEvent {
        match self {
            Command::Log { message } => AgentEvent::Log(message),
            Command::Rum { message } => AgentEvent::Rum(message),
            Command::RumUpdate { key, message } => AgentEvent::RumUpdate { key, message },
            Command::Record { record } => AgentEvent::Record(record),
            Command::Session { id } => AgentEvent::SessionChanged(id),
            Command::ViewCreated { id } => {
                AgentEvent::Lifecycle(LifecycleSignal::ViewCreated { view_id: id })
            }
            Command::ViewEnded { timestamp } => AgentEvent::Lifecycle(LifecycleSignal::ViewEnded {
                timestamp: timestamp.unwrap_or_else(now_millis),
            }),
            Command::Visibility {
                state: Visibility::Hidden,
            } => AgentEvent::Lifecycle(LifecycleSignal::VisibilityHidden),
            Command::Visibility {
                state: Visibility::Visible,
            } => AgentEvent::Lifecycle(LifecycleSignal::VisibilityVisible),
            Command::BeforeUnload => AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parses one NDJSON command. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<AgentEvent>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let command: Command = serde_json::from_str(line)?;
    Ok(Some(command.into_event()))
}

/// Forwards commands from `reader` until EOF, which is reported as an unload.
/// Returns early when the controller has gone away.
pub async fn read_commands<R>(reader: R, events: mpsc::Sender<AgentEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read command input: {}", e);
                break;
            }
        };

        let event = match parse_command(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping command: {}", e);
                continue;
            }
        };
        if events.send(event).await.is_err() {
            debug!("Controller stopped, no longer reading commands");
            return;
        }
    }

    info!("Command input closed, unloading");
    let _ = events
        .send(AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordType;

    #[test]
    fn test_parse_commands() {
        let event = parse_command(r#"{"type":"log","message":{"status":"error","message":"boom"}}"#)
            .unwrap()
            .unwrap();
        let AgentEvent::Log(message) = event else {
            panic!("expected a log event");
        };
        assert_eq!(message.get("status"), Some(&serde_json::json!("error")));

        let event = parse_command(r#"{"type":"record","record":{"type":4,"timestamp":12,"data":{"href":"/"}}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(event, AgentEvent::Record(record) if record.kind == RecordType::Meta && record.timestamp == 12));

        assert_eq!(
            parse_command(r#"{"type":"session","id":null}"#).unwrap(),
            Some(AgentEvent::SessionChanged(None))
        );
        assert_eq!(
            parse_command(r#"{"type":"visibility","state":"hidden"}"#).unwrap(),
            Some(AgentEvent::Lifecycle(LifecycleSignal::VisibilityHidden))
        );
        assert_eq!(
            parse_command(r#"{"type":"view_ended","timestamp":99}"#).unwrap(),
            Some(AgentEvent::Lifecycle(LifecycleSignal::ViewEnded { timestamp: 99 }))
        );
        assert_eq!(
            parse_command(r#"{"type":"rum_update","key":"view-1","message":{"view":{"id":"view-1"}}}"#)
                .unwrap()
                .map(|event| matches!(event, AgentEvent::RumUpdate { key, .. } if key == "view-1")),
            Some(true)
        );
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command(r#"{"type":"log","message":"not an object"}"#).is_err());
        assert!(parse_command(r#"{"type":"teleport"}"#).is_err());
        assert!(parse_command("{").is_err());
    }

    #[tokio::test]
    async fn test_eof_becomes_unload() {
        let input: &[u8] = b"{\"type\":\"view_created\",\"id\":\"v1\"}\nnot json\n\n";
        let (tx, mut rx) = mpsc::channel(8);

        read_commands(input, tx).await;

        assert_eq!(
            rx.recv().await,
            Some(AgentEvent::Lifecycle(LifecycleSignal::ViewCreated {
                view_id: Some("v1".to_string())
            }))
        );
        assert_eq!(
            rx.recv().await,
            Some(AgentEvent::Lifecycle(LifecycleSignal::BeforeUnload))
        );
        assert_eq!(rx.recv().await, None);
    }
}
