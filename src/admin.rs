//! Interactive maintenance console (the `admin` CLI subcommand).
//!
//! A sysop at the keyboard gets direct access to the store: list and delete
//! mail, bulletins, and channel entries without going over the air. The
//! console is line-oriented and generic over its input/output streams so
//! the command handling is testable without a terminal.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::storage::{Js8Bucket, Storage};

const HELP: &str = "\
Commands:
  mail                 list all stored mail
  bulletins [board]    list bulletins (optionally one board)
  channels             list channel directory entries
  js8 <urgent|groups|messages>  list stored JS8Call traffic
  del mail <id>        delete a mail message by unique id
  del bulletin <id>    delete a bulletin by unique id
  del channel <name>   delete a channel directory entry
  help                 show this help
  quit                 leave the console";

/// Run the console until `quit` or end of input.
pub fn run_console<R: BufRead, W: Write>(
    storage: &Storage,
    input: R,
    output: &mut W,
) -> Result<()> {
    writeln!(output, "meshboard maintenance console. Type 'help' for commands.")?;
    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            break;
        }
        handle_line(storage, trimmed, output)?;
    }
    writeln!(output, "Bye.")?;
    Ok(())
}

fn handle_line<W: Write>(storage: &Storage, line: &str, output: &mut W) -> Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["help"] => writeln!(output, "{}", HELP)?,
        ["mail"] => list_mail(storage, output)?,
        ["bulletins"] => list_bulletins(storage, None, output)?,
        ["bulletins", board] => list_bulletins(storage, Some(board), output)?,
        ["channels"] => list_channels(storage, output)?,
        ["js8", bucket] => list_js8(storage, bucket, output)?,
        ["del", "mail", id] => {
            if storage.delete_mail(id)? {
                writeln!(output, "Deleted mail {}.", id)?;
            } else {
                writeln!(output, "No mail with id {}.", id)?;
            }
        }
        ["del", "bulletin", id] => {
            if storage.delete_bulletin(id)? {
                writeln!(output, "Deleted bulletin {}.", id)?;
            } else {
                writeln!(output, "No bulletin with id {}.", id)?;
            }
        }
        ["del", "channel", name] => {
            if storage.delete_channel(name)? {
                writeln!(output, "Deleted channel {}.", name)?;
            } else {
                writeln!(output, "No channel named {}.", name)?;
            }
        }
        _ => writeln!(output, "Unknown command. Type 'help' for commands.")?,
    }
    Ok(())
}

fn list_mail<W: Write>(storage: &Storage, output: &mut W) -> Result<()> {
    let records = storage.all_mail()?;
    if records.is_empty() {
        writeln!(output, "No mail stored.")?;
        return Ok(());
    }
    for record in records {
        writeln!(
            output,
            "{}  {}  {} -> {}  \"{}\"",
            record.unique_id,
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.sender_short_name,
            record.recipient,
            record.subject
        )?;
    }
    Ok(())
}

fn list_bulletins<W: Write>(
    storage: &Storage,
    board: Option<&str>,
    output: &mut W,
) -> Result<()> {
    let records = match board {
        Some(board) => storage.bulletins_for_board(board)?,
        None => storage.all_bulletins()?,
    };
    if records.is_empty() {
        writeln!(output, "No bulletins stored.")?;
        return Ok(());
    }
    for record in records {
        writeln!(
            output,
            "{}  {}  [{}] {}  \"{}\"",
            record.unique_id,
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.board,
            record.sender_short_name,
            record.subject
        )?;
    }
    Ok(())
}

fn list_channels<W: Write>(storage: &Storage, output: &mut W) -> Result<()> {
    let records = storage.channels()?;
    if records.is_empty() {
        writeln!(output, "No channels stored.")?;
        return Ok(());
    }
    for record in records {
        writeln!(output, "{}  {}", record.name, record.url)?;
    }
    Ok(())
}

fn list_js8<W: Write>(storage: &Storage, bucket: &str, output: &mut W) -> Result<()> {
    let bucket = match bucket.to_ascii_lowercase().as_str() {
        "urgent" => Js8Bucket::Urgent,
        "groups" => Js8Bucket::Groups,
        "messages" => Js8Bucket::Messages,
        other => {
            writeln!(output, "Unknown bucket '{}' (urgent|groups|messages).", other)?;
            return Ok(());
        }
    };
    let records = storage.js8_messages(bucket)?;
    if records.is_empty() {
        writeln!(output, "No JS8Call traffic in that bucket.")?;
        return Ok(());
    }
    for record in records {
        writeln!(
            output,
            "{}  {} -> {}: {}",
            record.received_at.format("%Y-%m-%d %H:%M"),
            record.sender,
            record.target,
            record.body
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MailRecord;
    use chrono::Utc;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Storage) {
        let dir = TempDir::new().expect("tempdir");
        let storage = Storage::open(dir.path().to_str().unwrap()).expect("open storage");
        (dir, storage)
    }

    fn run(storage: &Storage, script: &str) -> String {
        let mut out = Vec::new();
        run_console(storage, Cursor::new(script.to_string()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn lists_and_deletes_mail() {
        let (_dir, storage) = open_temp();
        storage
            .add_mail(&MailRecord {
                unique_id: "m-1".into(),
                sender: "!aa".into(),
                sender_short_name: "AA01".into(),
                recipient: "!bb".into(),
                subject: "hello".into(),
                content: "body".into(),
                timestamp: Utc::now(),
            })
            .unwrap();

        let out = run(&storage, "mail\ndel mail m-1\nmail\nquit\n");
        assert!(out.contains("m-1"));
        assert!(out.contains("Deleted mail m-1."));
        assert!(out.contains("No mail stored."));
    }

    #[test]
    fn unknown_command_prints_hint() {
        let (_dir, storage) = open_temp();
        let out = run(&storage, "frobnicate\nquit\n");
        assert!(out.contains("Unknown command"));
    }

    #[test]
    fn missing_ids_are_reported() {
        let (_dir, storage) = open_temp();
        let out = run(&storage, "del bulletin nope\ndel channel nada\nquit\n");
        assert!(out.contains("No bulletin with id nope."));
        assert!(out.contains("No channel named nada."));
    }
}
