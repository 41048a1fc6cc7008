//! # CatalogDB Codec
//!
//! Encoding of persisted CatalogDB structures.
//!
//! This crate provides:
//! - A serde bridge onto CBOR ([`encode`], [`decode`])
//! - Length-prefixed, CRC32-checked frames ([`frame`], [`unframe`])
//!
//! ## Usage
//!
//! ```
//! use catalogdb_codec::{decode, encode, frame, unframe};
//!
//! let bytes = encode(&(42u32, "basic")).unwrap();
//! let framed = frame(&bytes);
//! let payload = unframe(&framed).unwrap();
//! let (pk, list): (u32, String) = decode(payload).unwrap();
//! assert_eq!((pk, list.as_str()), (42, "basic"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod frame;

pub use cbor::{decode, encode};
pub use error::{CodecError, CodecResult};
pub use frame::{
    crc32, frame, frame_len, unframe, FRAME_HEADER_SIZE, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE,
};
