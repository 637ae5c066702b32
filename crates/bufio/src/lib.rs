//! Buffered byte I/O for wire protocol parsers.
//!
//! This crate holds the buffering layer shared by the multipart codec and the
//! HTTP/1.1 server:
//!
//! - [`BufReader`]: fixed size read buffer with delimiter scans, line reads
//!   and peeks
//! - [`BufWriter`]: write buffer that remembers the first sink failure
//! - [`DelimiterDecoder`]: streaming multi-byte delimiter split, also exposed
//!   as [`read_delim`], [`read_string_delim`] and [`read_lines`]
//! - [`textproto`]: MIME header block reader
//!
//! # Results and partial data
//!
//! Buffered operations return `Ok(Some(_))` for data and `Ok(None)` for end of
//! stream. Failures are [`BufError`] values; the ones that interrupt a unit of
//! work carry the bytes read so far so that nothing already consumed is lost.
//!
//! # Example
//!
//! ```no_run
//! use micro_bufio::BufReader;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let mut reader = BufReader::new(stream);
//!
//! while let Some(line) = reader.read_line().await? {
//!     println!("{}", String::from_utf8_lossy(&line.line));
//! }
//! # Ok(())
//! # }
//! ```

mod delim;
mod error;
mod reader;
mod writer;

pub mod textproto;

pub use delim::{DelimiterDecoder, read_delim, read_lines, read_string_delim};
pub use error::BufError;
pub use reader::{BufReader, DEFAULT_BUF_SIZE, Line, MAX_CONSECUTIVE_EMPTY_READS, MIN_BUF_SIZE};
pub use writer::BufWriter;
