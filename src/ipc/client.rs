use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{LoggerError, Result};
use crate::ipc::protocol::{SENTINEL, encode_datagram};

/// Reads one snapshot dump, returning its lines without the sentinel.
pub async fn fetch_snapshot(addr: &str) -> Result<Vec<String>> {
    let stream = TcpStream::connect(addr).await?;
    let mut reader = BufReader::new(stream);
    let sentinel = SENTINEL.trim_end();
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Err(LoggerError::TruncatedSnapshot(addr.to_string()));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line == sentinel {
            return Ok(lines);
        }
        lines.push(line.to_string());
    }
}

/// Prints the live feed until the server closes the connection.
pub async fn follow(addr: &str, mut on_line: impl FnMut(&str)) -> Result<()> {
    let stream = TcpStream::connect(addr).await?;
    let mut reader = BufReader::new(stream);
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            break;
        }
        on_line(line.trim_end_matches(['\r', '\n']));
    }
    Ok(())
}

pub async fn send_datagram(addr: SocketAddr, tag: Option<&str>, message: &str) -> Result<()> {
    let bind = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind).await?;
    let payload = encode_datagram(tag, message);
    socket.send_to(payload.as_bytes(), addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(body.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn snapshot_stops_at_sentinel() {
        let addr = serve_once("12:00:00 (a): one\n12:00:01 (b): two\nEOF\n").await;
        let lines = fetch_snapshot(&addr).await.unwrap();
        assert_eq!(lines, vec!["12:00:00 (a): one", "12:00:01 (b): two"]);
    }

    #[tokio::test]
    async fn snapshot_without_sentinel_is_truncated() {
        let addr = serve_once("12:00:00 (a): one\n").await;
        assert!(matches!(
            fetch_snapshot(&addr).await,
            Err(LoggerError::TruncatedSnapshot(_))
        ));
    }

    #[tokio::test]
    async fn follow_reads_until_close() {
        let addr = serve_once("x\ny\n").await;
        let mut seen = Vec::new();
        follow(&addr, |line| seen.push(line.to_string())).await.unwrap();
        assert_eq!(seen, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn send_prefixes_the_tag() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();
        send_datagram(addr, Some("db"), "ready").await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"db$ready");
    }
}
