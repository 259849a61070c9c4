//! Interactive relay client helpers.
//!
//! [`prompt`] reads one line and parses it into a [`Command`]:
//!
//! ```text
//! get <type_id> <id>
//! save <type_id> <id> <text...>
//! delete <type_id> <id>
//! info
//! .exit
//! ```
use std::io::{BufRead, Write};

use crate::message::{MessageType, RelayMessage, RelayPayload};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, also returned at end of input.
    Exit,
    Get { type_id: i16, id: i32 },
    Save { type_id: i16, id: i32, text: String },
    Delete { type_id: i16, id: i32 },
    /// Runtime info of the server's component.
    Info,
    /// Blank line.
    Empty,
}

impl Command {
    /// The relay message this command sends, if any. Save and delete wait for
    /// confirmation so the prompt can show an outcome.
    pub fn to_message(&self) -> Option<RelayMessage> {
        match self {
            Command::Get { type_id, id } => Some(RelayMessage::get(*type_id, *id)),
            Command::Save { type_id, id, text } => {
                let mut message = RelayMessage::save(RelayPayload::new(*type_id, *id, text.as_bytes()));
                message.message_type = MessageType::SaveWithConfirm;
                Some(message)
            }
            Command::Delete { type_id, id } => {
                let mut message = RelayMessage::delete(*type_id, *id);
                message.message_type = MessageType::DeleteWithConfirm;
                Some(message)
            }
            Command::Exit | Command::Info | Command::Empty => None,
        }
    }
}

/// Prompt user for a relay command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| format!("failed to write prompt: {e}"))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if read == 0 {
        return Ok(Command::Exit);
    }
    parse(s.trim())
}

fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(Command::Empty);
    };

    match keyword {
        ".exit" => Ok(Command::Exit),
        "info" => Ok(Command::Info),
        "get" => {
            let (type_id, id) = parse_key(&mut words)?;
            Ok(Command::Get { type_id, id })
        }
        "delete" => {
            let (type_id, id) = parse_key(&mut words)?;
            Ok(Command::Delete { type_id, id })
        }
        "save" => {
            let (type_id, id) = parse_key(&mut words)?;
            let text = words.collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                return Err("save needs a value".to_string());
            }
            Ok(Command::Save { type_id, id, text })
        }
        s => Err(format!("unrecognized command '{s}'")),
    }
}

fn parse_key<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<(i16, i32), String> {
    let type_id = words.next().ok_or("missing type id")?;
    let id = words.next().ok_or("missing object id")?;
    let type_id = type_id
        .parse()
        .map_err(|e| format!("invalid type id '{type_id}': {e}"))?;
    let id = id.parse().map_err(|e| format!("invalid object id '{id}': {e}"))?;
    Ok((type_id, id))
}

/// One-line summary of a reply for the prompt.
pub fn describe(message: &RelayMessage) -> String {
    let outcome = match message.result_outcome {
        Some(outcome) => format!("{outcome:?}"),
        None => "no reply".to_string(),
    };
    let mut out = format!("{:?} {}/{}: {outcome}", message.message_type, message.type_id, message.id);
    if let Some(bytes) = message.payload.as_ref().and_then(|p| p.byte_array.as_deref()) {
        out.push_str(&format!(" {:?}", String::from_utf8_lossy(bytes)));
    }
    if !message.result_details.is_empty() {
        out.push_str(&format!(" ({})", message.result_details));
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::message::RelayOutcome;

    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_commands() {
        let mut output = Vec::new();
        assert_eq!(
            prompt(&b"get 3 42\n"[..], &mut output).unwrap(),
            Command::Get { type_id: 3, id: 42 }
        );
        assert_eq!(
            prompt(&b"save 3 42 hello  there\n"[..], &mut output).unwrap(),
            Command::Save {
                type_id: 3,
                id: 42,
                text: "hello there".into()
            }
        );
        assert_eq!(prompt(&b"\n"[..], &mut output).unwrap(), Command::Empty);
        assert_eq!(prompt(&b""[..], &mut output).unwrap(), Command::Exit);
        assert_eq!(prompt(&b" info \n"[..], &mut output).unwrap(), Command::Info);
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }

    #[test]
    #[should_panic(expected = "invalid type id 'x'")]
    fn prompt_bad_key() {
        prompt(&b"delete x 1\n"[..], Vec::new()).unwrap();
    }

    #[test]
    fn commands_become_messages() {
        let save = Command::Save {
            type_id: 1,
            id: 2,
            text: "v".into(),
        }
        .to_message()
        .unwrap();
        assert_eq!(save.message_type, MessageType::SaveWithConfirm);
        assert_eq!(save.payload.as_ref().unwrap().byte_array.as_deref(), Some(&b"v"[..]));
        assert!(Command::Info.to_message().is_none());
    }

    #[test]
    fn describe_reply() {
        let mut message = RelayMessage::get(1, 2);
        assert_eq!(describe(&message), "Get 1/2: no reply");
        message.result_outcome = Some(RelayOutcome::Success);
        message.payload = Some(RelayPayload::new(1, 2, b"hi".to_vec()));
        assert_eq!(describe(&message), "Get 1/2: Success \"hi\"");
    }
}
