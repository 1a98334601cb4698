//! Query server (spec.md §4.8): binds a TCP listener, accepts
//! connections, and spawns a detached worker thread per connection that
//! parses a line-oriented protocol against the current index.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::handover::{Handover, Wait};
use crate::model::ClaimRef;
use crate::runtime::{CurrentIndex, Runtime};

/// Bound on a single protocol line (spec.md §4.8).
const MAX_LINE_BYTES: u64 = 8 * 1024;

const HELP_BANNER: &[&str] = &[
    "s <query>        search for claims matching <query>",
    "c <claim-ref>    list claims referencing <claim-ref>",
    "help | ?         show this banner",
    "exit             close the connection",
];

/// Binds and accepts until shutdown. Listener polling uses a short
/// non-blocking sleep rather than `accept_timeout` (not available on
/// `std::net::TcpListener`) so the `running` flag is still observed
/// promptly without a dedicated wakeup mechanism.
pub fn run(runtime: &Runtime, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .with_context(|| format!("binding query listener on {}:{}", host, port))?;
    listener
        .set_nonblocking(true)
        .context("setting query listener non-blocking")?;
    log::info!("query-server: listening on {}:{}", host, port);

    while runtime.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::debug!("query-server: accepted connection from {}", addr);
                let current_index = runtime.current_index.clone();
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &current_index) {
                        log::debug!("query-server: connection from {} ended: {:#}", addr, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(200));
            }
            Err(err) => {
                log::warn!("query-server: accept error: {:#}", err);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, current_index: &Handover<Arc<CurrentIndex>>) -> Result<()> {
    let mut writer = stream.try_clone().context("cloning connection for writer")?;
    let mut reader = BufReader::new(stream);

    let mut line = Vec::new();
    loop {
        let n = read_line_bounded(&mut reader, &mut line)?;
        if n == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            continue;
        }

        let (cmd, arg) = split_command(text);
        match cmd {
            "s" => handle_query(&mut writer, current_index, arg)?,
            "c" => handle_visit(&mut writer, current_index, arg)?,
            "?" | "help" => handle_help(&mut writer)?,
            "exit" => break,
            _ => write_framed(&mut writer, &format!("ERROR unrecognized command {:?}\n", cmd))?,
        }
    }
    Ok(())
}

fn read_line_bounded(reader: &mut impl BufRead, buf: &mut Vec<u8>) -> Result<usize> {
    buf.clear();
    let n = reader.by_ref().take(MAX_LINE_BYTES).read_until(b'\n', buf)?;
    if n > 0 && buf.last() != Some(&b'\n') && (buf.len() as u64) >= MAX_LINE_BYTES {
        log::warn!("query-server: dropping oversized protocol line (> {} bytes)", MAX_LINE_BYTES);
        let mut discard = Vec::new();
        reader.read_until(b'\n', &mut discard)?;
    }
    Ok(n)
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim_start()),
        None => (line, ""),
    }
}

fn write_framed(writer: &mut impl Write, body: &str) -> Result<()> {
    writer.write_all(body.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn peek_current(current_index: &Handover<Arc<CurrentIndex>>) -> Option<Arc<CurrentIndex>> {
    match current_index.wait_for_occupied() {
        Wait::Ready(guard) => Some(Arc::clone(guard.peek())),
        Wait::ShuttingDown => None,
    }
}

/// `s <query>`: status line, then zero or more result records, then the
/// message terminator (spec.md §6).
fn handle_query(writer: &mut impl Write, current_index: &Handover<Arc<CurrentIndex>>, query_text: &str) -> Result<()> {
    let index = match peek_current(current_index) {
        Some(index) => index,
        None => return write_framed(writer, "ERROR no index available\n"),
    };

    let buf = RefCell::new(Vec::<u8>::new());
    index.db.query(
        query_text,
        |status| {
            let mut out = buf.borrow_mut();
            match status {
                Ok(()) => {
                    let _ = writeln!(out, "OK");
                }
                Err(msg) => {
                    let _ = writeln!(out, "ERROR {}", msg);
                }
            }
        },
        |claim_ref, tuples| {
            let mut out = buf.borrow_mut();
            let _ = writeln!(out, "{}", claim_ref);
            for (key, value) in tuples {
                let _ = writeln!(out, "\t{}={}", key, value);
            }
        },
    )?;

    let mut body = buf.into_inner();
    body.push(b'\n');
    writer.write_all(&body)?;
    Ok(())
}

/// `c <claim-ref>`: status line, then the referencing claim refs, one
/// per line (spec.md §4.8).
fn handle_visit(writer: &mut impl Write, current_index: &Handover<Arc<CurrentIndex>>, arg: &str) -> Result<()> {
    let index = match peek_current(current_index) {
        Some(index) => index,
        None => return write_framed(writer, "ERROR no index available\n"),
    };

    let seed_ref: ClaimRef = match arg.trim().parse() {
        Ok(seed_ref) => seed_ref,
        Err(err) => {
            return write_framed(writer, &format!("ERROR invalid claim ref {:?}: {}\n", arg, err));
        }
    };

    let buf = RefCell::new(Vec::<u8>::new());
    {
        let _ = writeln!(buf.borrow_mut(), "OK");
    }
    index.db.visit_claims_for_seed(seed_ref, |claim_ref| {
        let _ = writeln!(buf.borrow_mut(), "{}", claim_ref);
    })?;

    let mut body = buf.into_inner();
    body.push(b'\n');
    writer.write_all(&body)?;
    Ok(())
}

fn handle_help(writer: &mut impl Write) -> Result<()> {
    let mut body = Vec::new();
    for line in HELP_BANNER {
        let _ = writeln!(body, "{}", line);
    }
    body.push(b'\n');
    writer.write_all(&body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_separates_command_from_argument() {
        assert_eq!(split_command("s color=red"), ("s", "color=red"));
        assert_eq!(split_command("c  some-ref-0"), ("c", "some-ref-0"));
    }

    #[test]
    fn split_command_with_no_argument_leaves_it_empty() {
        assert_eq!(split_command("exit"), ("exit", ""));
        assert_eq!(split_command("?"), ("?", ""));
    }

    #[test]
    fn write_framed_appends_message_terminator() {
        let mut out = Vec::new();
        write_framed(&mut out, "OK").unwrap();
        assert_eq!(out, b"OK\n");
    }

    #[test]
    fn read_line_bounded_stops_at_newline_and_leaves_rest_for_next_call() {
        let mut reader = std::io::Cursor::new(b"s color=red\nnext\n".to_vec());
        let mut buf = Vec::new();
        let n = read_line_bounded(&mut reader, &mut buf).unwrap();
        assert!(n > 0);
        assert_eq!(buf, b"s color=red\n");

        buf.clear();
        read_line_bounded(&mut reader, &mut buf).unwrap();
        assert_eq!(buf, b"next\n");
    }

    #[test]
    fn read_line_bounded_returns_zero_at_eof() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        let mut buf = Vec::new();
        let n = read_line_bounded(&mut reader, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn read_line_bounded_discards_oversized_line() {
        let mut oversized = vec![b'a'; MAX_LINE_BYTES as usize + 10];
        oversized.push(b'\n');
        oversized.extend_from_slice(b"s color=red\n");
        let mut reader = std::io::Cursor::new(oversized);
        let mut buf = Vec::new();
        read_line_bounded(&mut reader, &mut buf).unwrap();
        // The oversized line is discarded entirely; the next read sees the
        // following, well-formed line.
        buf.clear();
        let n = read_line_bounded(&mut reader, &mut buf).unwrap();
        assert!(n > 0);
        assert_eq!(buf, b"s color=red\n");
    }
}
