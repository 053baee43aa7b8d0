//! Stdin command parsing for headless mode
//!
//! One command per line:
//!
//! ```text
//! connect [sim|mqtt]          disconnect
//! emotion <NAME>              sound <TYPE> [VOLUME]
//! publish [-q 0|1] <TOPIC> <PAYLOAD...>
//! clear [messages|logs|all]   export [FILTER...]
//! quit
//! ```

use sangi_core::prelude::*;
use sangi_core::Emotion;
use sangi_link::QoS;

/// Which history `clear` empties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Messages,
    Logs,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `None` uses the transport chosen on the command line.
    Connect { simulated: Option<bool> },
    Disconnect,
    Emotion(Emotion),
    Sound { kind: String, volume: Option<u8> },
    Publish { topic: String, payload: String, qos: QoS },
    Clear(ClearTarget),
    /// Print the log history, optionally filtered.
    Export { filter: Option<String> },
    Quit,
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    let Some((verb, rest)) = split_word(line) else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "connect" => Command::Connect {
            simulated: match rest {
                "" => None,
                "sim" | "simulated" => Some(true),
                "mqtt" | "broker" => Some(false),
                other => return Err(Error::config(format!("Unknown transport: {other}"))),
            },
        },
        "disconnect" => Command::Disconnect,
        "emotion" => {
            if rest.is_empty() {
                return Err(Error::config("Usage: emotion <NAME>"));
            }
            Command::Emotion(rest.parse()?)
        }
        "sound" => {
            let Some((kind, volume)) = split_word(rest) else {
                return Err(Error::config("Usage: sound <TYPE> [VOLUME]"));
            };
            let volume = match volume {
                "" => None,
                v => Some(parse_volume(v)?),
            };
            Command::Sound {
                kind: kind.to_uppercase(),
                volume,
            }
        }
        "publish" => parse_publish(rest)?,
        "clear" => Command::Clear(match rest {
            "" | "all" => ClearTarget::All,
            "messages" => ClearTarget::Messages,
            "logs" => ClearTarget::Logs,
            other => return Err(Error::config(format!("Unknown clear target: {other}"))),
        }),
        "export" => Command::Export {
            filter: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "q" | "quit" | "exit" => Command::Quit,
        other => return Err(Error::config(format!("Unknown command: {other}"))),
    };
    Ok(Some(command))
}

/// Volume as sent to the robot, 0-100.
pub fn parse_volume(value: &str) -> Result<u8> {
    match value.parse::<u8>() {
        Ok(volume) if volume <= 100 => Ok(volume),
        _ => Err(Error::config(format!("Volume must be 0-100, got {value}"))),
    }
}

fn parse_publish(rest: &str) -> Result<Command> {
    let (qos, rest) = match split_word(rest) {
        Some(("-q", after)) => {
            let (level, after) = split_word(after)
                .ok_or_else(|| Error::config("Usage: publish [-q 0|1] <TOPIC> <PAYLOAD>"))?;
            let qos = level
                .parse::<u8>()
                .ok()
                .and_then(QoS::from_u8)
                .ok_or_else(|| Error::config(format!("QoS must be 0 or 1, got {level}")))?;
            (qos, after)
        }
        _ => (QoS::AtMostOnce, rest),
    };

    match split_word(rest) {
        Some((topic, payload)) if !payload.is_empty() => Ok(Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
        }),
        _ => Err(Error::config("Usage: publish [-q 0|1] <TOPIC> <PAYLOAD>")),
    }
}

/// First whitespace-delimited word and the trimmed remainder.
fn split_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((input, "")),
    }
}
