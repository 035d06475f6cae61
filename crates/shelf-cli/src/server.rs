//! TCP front end for the line protocol.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use shelf_core::Shelf;

use crate::protocol::{handle_line, invalid_response};

/// Longest request line accepted, newline excluded. Large enough for a
/// base64 store upload; anything longer closes the connection.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

pub fn bind(address: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(address).map_err(|e| anyhow::anyhow!("Bind to {} failed: {}", address, e))
}

/// Accept connections until the listener fails, one thread per connection.
pub fn run(listener: TcpListener, shelf: Arc<Shelf>) -> anyhow::Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let shelf = Arc::clone(&shelf);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &shelf) {
                        tracing::debug!(%peer, error = %err, "connection closed with error");
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(anyhow::anyhow!("Accept failed: {}", err)),
        }
    }
}

fn handle_connection(stream: TcpStream, shelf: &Shelf) -> std::io::Result<()> {
    let peer: Option<SocketAddr> = stream.peer_addr().ok();
    tracing::debug!(?peer, "connection opened");
    let writer = stream.try_clone()?;
    serve_lines(BufReader::new(stream), writer, shelf, MAX_LINE_BYTES)?;
    tracing::debug!(?peer, "connection closed");
    Ok(())
}

/// Answer request lines until EOF or until a line exceeds `max_line`.
fn serve_lines<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    shelf: &Shelf,
    max_line: usize,
) -> std::io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .by_ref()
            .take(max_line as u64 + 1)
            .read_line(&mut line)?;
        if read == 0 {
            break;
        }
        if line.len() > max_line && !line.ends_with('\n') {
            tracing::warn!(limit = max_line, "request line too long; closing connection");
            let response = invalid_response(format!(
                "Request line exceeds {} bytes",
                max_line
            ));
            writer.write_all(response.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            break;
        }
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let response = handle_line(shelf, request);
        writer.write_all(response.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use shelf_core::{Database, MemorySessionStore};

    #[test]
    fn test_round_trip_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("shelf.db"), &dir.path().join("uploads"))
            .unwrap();
        let shelf = Arc::new(Shelf::new(db, MemorySessionStore::default()));

        let listener = bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        std::thread::spawn(move || run(listener, shelf));

        let stream = TcpStream::connect(address).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        writer.write_all(b"{\"op\":\"ping\"}\n\n").unwrap();
        writer
            .write_all(b"{\"op\":\"register\",\"username\":\"alice\",\"password\":\"pw\"}\n")
            .unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let ping: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(ping["ok"], true);

        line.clear();
        reader.read_line(&mut line).unwrap();
        let register: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(register["data"]["username"], "alice");
    }

    #[test]
    fn test_overlong_line_is_rejected_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("shelf.db"), &dir.path().join("uploads"))
            .unwrap();
        let shelf = Shelf::new(db, MemorySessionStore::default());

        let mut input = b"{\"op\":\"ping\"}\n".to_vec();
        input.extend(std::iter::repeat(b'x').take(100));
        input.extend_from_slice(b"\n{\"op\":\"ping\"}\n");

        let mut output = Vec::new();
        serve_lines(&input[..], &mut output, &shelf, 64).unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["ok"], true);
        assert_eq!(responses[1]["ok"], false);
        assert_eq!(responses[1]["error"]["kind"], "invalid_request");
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("shelf.db"), &dir.path().join("uploads"))
            .unwrap();
        let shelf = Shelf::new(db, MemorySessionStore::default());

        let request = b"{\"op\":\"ping\"}";
        let mut input = request.to_vec();
        input.push(b'\n');

        let mut output = Vec::new();
        serve_lines(&input[..], &mut output, &shelf, request.len()).unwrap();
        let response: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(response["ok"], true);
    }
}
