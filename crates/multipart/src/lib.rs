//! Streaming `multipart/form-data` codec.
//!
//! The reader side walks a multipart body part by part without buffering
//! whole parts: [`MultipartReader::next_part`] yields a [`Part`] whose body is
//! read through the boundary scanner in [`scan`]. [`MultipartReader::read_form`]
//! collects a whole form, keeping small files in memory and spooling larger ones
//! to temp files through a [`TempStorage`].
//!
//! The writer side, [`MultipartWriter`], produces the same wire format.
//!
//! # Temp files
//!
//! Spooled files are owned by the returned [`MultipartForm`] and are only
//! deleted by [`MultipartForm::remove_all`]. [`MultipartForm::into_guard`]
//! opts into deleting them when the [`FormGuard`] is dropped instead.
//!
//! # Example
//!
//! ```no_run
//! use micro_multipart::{FormOptions, MultipartReader};
//!
//! # async fn run(body: &[u8], content_type: &str) -> Result<(), micro_multipart::MultipartError> {
//! let mut reader = MultipartReader::from_content_type(body, content_type)?;
//! let form = reader.read_form(&FormOptions::default()).await?;
//!
//! if let Some(title) = form.value("title") {
//!     println!("title: {title}");
//! }
//! form.remove_all().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod form;
mod reader;
pub mod scan;
mod storage;
mod writer;

pub use error::MultipartError;
pub use form::{FileData, FormFile, FormGuard, FormOptions, MultipartForm};
pub use reader::{MultipartReader, Part};
pub use storage::{FsTempStorage, LocalTempStorage, TempStorage};
pub use writer::{MultipartWriter, PartWriter, random_boundary, validate_boundary};
