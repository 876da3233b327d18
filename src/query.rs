//! The ServerQuery wire client: transport, authentication and command execution.
use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use strum::EnumString;

/// Every ServerQuery response ends with this status line.
pub const SENTINEL: &[u8] = b"error id=0 msg=ok";

/// The raw-mode greeting banner ends with this word.
const GREETING_END: &[u8] = b"command.";

/// Connect and read timeout for the query socket.
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, EnumString, Eq, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(serialize = "raw")]
    Raw,
    #[strum(serialize = "ssh")]
    Ssh,
}

/// The I/O seam between the query client and the network.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Write one command line, newline-terminated.
    fn send_line(&mut self, line: &str) -> Result<()>;

    /// Read until `marker` appears in the stream, the peer closes the
    /// connection, or the read timeout elapses.  Returns whatever was
    /// accumulated, marker included if it was seen.
    fn read_until(&mut self, marker: &[u8]) -> Result<Vec<u8>>;
}

/// The deprecated plaintext ("telnet") ServerQuery transport.
#[derive(Debug)]
pub struct RawTransport {
    stream: TcpStream,
}

impl RawTransport {
    /// Connect to the ServerQuery port and drain the greeting banner.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolving {}", host))?
            .next()
            .ok_or_else(|| anyhow!("no address found for {}", host))?;
        let stream = TcpStream::connect_timeout(&addr, TIMEOUT)
            .with_context(|| format!("connecting to {}:{}", host, port))?;
        stream
            .set_read_timeout(Some(TIMEOUT))
            .context("setting read timeout")?;
        let mut transport = RawTransport { stream };
        transport.read_until(GREETING_END)?;
        Ok(transport)
    }
}

impl Transport for RawTransport {
    fn send_line(&mut self, line: &str) -> Result<()> {
        self.stream
            .write_all(line.as_bytes())
            .and_then(|()| self.stream.write_all(b"\n"))
            .with_context(|| format!("sending {:?}", line))
    }

    fn read_until(&mut self, marker: &[u8]) -> Result<Vec<u8>> {
        let mut acc = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                // Peer closed the connection
                Ok(0) => break,
                Ok(n) => {
                    acc.extend_from_slice(&chunk[..n]);
                    if find(&acc, marker).is_some() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                // Best effort: a timeout yields whatever has arrived so far
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(e).context("reading response"),
            }
        }
        Ok(acc)
    }
}

/// Locate `needle` within `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// An authenticated-or-not session with one ServerQuery interface.
#[derive(Debug)]
pub struct QueryClient<T: Transport> {
    transport: T,
}

impl QueryClient<RawTransport> {
    /// Open a session with the selected protocol.
    pub fn connect(protocol: Protocol, host: &str, port: u16) -> Result<Self> {
        match protocol {
            Protocol::Raw => Ok(QueryClient::new(RawTransport::connect(host, port)?)),
            Protocol::Ssh => Err(anyhow!(
                "the ssh transport is not implemented; use 'raw' instead"
            )),
        }
    }
}

impl<T: Transport> QueryClient<T> {
    pub fn new(transport: T) -> Self {
        QueryClient { transport }
    }

    /// Authenticate the ServerQuery user.
    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.transport
            .send_line(&format!("login {} {}", user, password))?;
        let response = self.transport.read_until(SENTINEL)?;
        if find(&response, SENTINEL).is_none() {
            return Err(anyhow!("login was not accepted by the server"));
        }
        Ok(())
    }

    /// Execute one command and return the payload with the protocol envelope
    /// (leading line breaks, trailing status line) stripped.
    ///
    /// If the success sentinel never arrives the accumulated bytes are
    /// returned as-is, which may be an empty string.
    pub fn execute(&mut self, command: &str) -> Result<String> {
        self.transport.send_line(command)?;
        let response = self.transport.read_until(SENTINEL)?;
        let payload = match find(&response, SENTINEL) {
            Some(pos) => &response[..pos],
            None => &response[..],
        };
        Ok(String::from_utf8_lossy(payload).trim().to_string())
    }

    /// Log out and end the session cleanly.
    pub fn logout(&mut self) -> Result<()> {
        self.transport.send_line("logout")?;
        self.transport.read_until(SENTINEL)?;
        self.transport.send_line("quit")?;
        self.transport.read_until(SENTINEL)?;
        Ok(())
    }
}

/// Undo the escape sequences ServerQuery applies to values.
pub fn unescape(escaped: &str) -> String {
    escaped
        .replace("\\\\", "\\")
        .replace("\\/", "/")
        .replace("\\s", " ")
        .replace("\\p", "|")
}

/// Split one `key=value` response token.  The key has the command-specific
/// prefix up to the first underscore stripped (`virtualserver_id` becomes
/// `id`); the value, if present, is unescaped.  Empty or degenerate tokens
/// yield `None`.
pub fn split_token(token: &str) -> Option<(String, Option<String>)> {
    if token.is_empty() {
        return None;
    }
    let (key, value) = match token.split_once('=') {
        Some((key, value)) => (key, Some(unescape(value))),
        None => (token, None),
    };
    let key = match key.split_once('_') {
        Some((_, rest)) => rest,
        None => key,
    };
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value))
}

#[cfg(test)]
mod t {
    use super::*;

    mod protocol {
        use super::*;

        #[test]
        fn case_insensitive() {
            assert_eq!("raw".parse::<Protocol>().unwrap(), Protocol::Raw);
            assert_eq!("RAW".parse::<Protocol>().unwrap(), Protocol::Raw);
            assert_eq!("Ssh".parse::<Protocol>().unwrap(), Protocol::Ssh);
        }

        #[test]
        fn unsupported() {
            assert!("foo".parse::<Protocol>().is_err());
            assert!("telnet".parse::<Protocol>().is_err());
        }

        /// Selecting ssh fails before any socket is opened.
        #[test]
        fn ssh_is_unimplemented() {
            let e = QueryClient::connect(Protocol::Ssh, "localhost", 10011).unwrap_err();
            assert!(e.to_string().contains("not implemented"));
        }
    }

    mod unescape {
        use super::*;

        #[test]
        fn mappings() {
            assert_eq!(unescape(r"a\\b"), r"a\b");
            assert_eq!(unescape(r"a\/b"), "a/b");
            assert_eq!(unescape(r"OCTA\seSports"), "OCTA eSports");
            assert_eq!(unescape(r"a\pb"), "a|b");
        }

        #[test]
        fn idempotent_on_unescaped_input() {
            let plain = "4G-Server - Dein Prepaid Hoster";
            assert_eq!(unescape(plain), plain);
            assert_eq!(unescape(&unescape(plain)), plain);
        }
    }

    mod split_token {
        use super::*;

        #[test]
        fn strips_prefix_and_unescapes() {
            assert_eq!(
                split_token("virtualserver_id=2"),
                Some(("id".to_string(), Some("2".to_string())))
            );
            assert_eq!(
                split_token(r"virtualserver_name=OCTA\seSports"),
                Some(("name".to_string(), Some("OCTA eSports".to_string())))
            );
        }

        /// A key without any underscore is used whole.
        #[test]
        fn no_prefix() {
            assert_eq!(
                split_token("version=3.13.3"),
                Some(("version".to_string(), Some("3.13.3".to_string())))
            );
        }

        /// Only the first underscore is stripped.
        #[test]
        fn multi_underscore_key() {
            assert_eq!(
                split_token("connection_filetransfer_bandwidth_sent=0"),
                Some((
                    "filetransfer_bandwidth_sent".to_string(),
                    Some("0".to_string())
                ))
            );
        }

        #[test]
        fn value_less_token() {
            assert_eq!(split_token("serverinstance_flag"), Some(("flag".to_string(), None)));
        }

        #[test]
        fn degenerate_tokens() {
            assert_eq!(split_token(""), None);
            assert_eq!(split_token("virtualserver_=1"), None);
        }
    }

    mod client {
        use super::*;

        /// The trailing status line and surrounding line breaks are stripped.
        #[test]
        fn execute_strips_envelope() {
            let mut mock = MockTransport::new();
            mock.expect_send_line()
                .withf(|line| line == "version")
                .times(1)
                .returning(|_| Ok(()));
            mock.expect_read_until().times(1).returning(|_| {
                Ok(b"version=3.13.3 build=1608128225 platform=Linux\n\rerror id=0 msg=ok".to_vec())
            });

            let mut client = QueryClient::new(mock);
            let payload = client.execute("version").unwrap();
            assert_eq!(payload, "version=3.13.3 build=1608128225 platform=Linux");
        }

        /// A response without the sentinel (timeout, truncation) comes back
        /// trimmed but otherwise as-is.
        #[test]
        fn execute_without_sentinel() {
            let mut mock = MockTransport::new();
            mock.expect_send_line().times(1).returning(|_| Ok(()));
            mock.expect_read_until()
                .times(1)
                .returning(|_| Ok(b"version=3.13.3\n\r".to_vec()));

            let mut client = QueryClient::new(mock);
            assert_eq!(client.execute("version").unwrap(), "version=3.13.3");
        }

        /// A fully timed-out response yields an empty payload, not an error.
        #[test]
        fn execute_with_empty_response() {
            let mut mock = MockTransport::new();
            mock.expect_send_line().times(1).returning(|_| Ok(()));
            mock.expect_read_until().times(1).returning(|_| Ok(Vec::new()));

            let mut client = QueryClient::new(mock);
            assert_eq!(client.execute("hostinfo").unwrap(), "");
        }

        #[test]
        fn login_sends_credentials() {
            let mut mock = MockTransport::new();
            mock.expect_send_line()
                .withf(|line| line == "login serveradmin hunter2")
                .times(1)
                .returning(|_| Ok(()));
            mock.expect_read_until()
                .times(1)
                .returning(|_| Ok(SENTINEL.to_vec()));

            let mut client = QueryClient::new(mock);
            client.login("serveradmin", "hunter2").unwrap();
        }

        /// A rejected login surfaces as an error rather than a silent
        /// continuation with an unauthenticated session.
        #[test]
        fn login_rejected() {
            let mut mock = MockTransport::new();
            mock.expect_send_line().times(1).returning(|_| Ok(()));
            mock.expect_read_until()
                .times(1)
                .returning(|_| Ok(b"error id=520 msg=invalid\\sloginname\\sor\\spassword".to_vec()));

            let mut client = QueryClient::new(mock);
            client.login("serveradmin", "wrong").unwrap_err();
        }

        #[test]
        fn logout_then_quit() {
            let mut mock = MockTransport::new();
            mock.expect_send_line()
                .withf(|line| line == "logout")
                .times(1)
                .returning(|_| Ok(()));
            mock.expect_send_line()
                .withf(|line| line == "quit")
                .times(1)
                .returning(|_| Ok(()));
            mock.expect_read_until()
                .times(2)
                .returning(|_| Ok(SENTINEL.to_vec()));

            let mut client = QueryClient::new(mock);
            client.logout().unwrap();
        }
    }
}
