//! CDR codec
//!
//! Endian and alignment aware encoding of the GIOP primitive types. Both
//! directions go through explicit `to_be_bytes`/`to_le_bytes` transforms, so
//! the host byte order never leaks onto the wire.
//!
//! - `CdrOutputStream`: writer, configured at construction
//! - `CdrInputStream`: reader, configured once after the header is parsed
//! - encapsulations for nested data (tagged components, service contexts)

pub use encapsulation::encode_encapsulation;
pub use endian::{Endian, FLAG_LITTLE_ENDIAN};
pub use input_stream::CdrInputStream;
pub use output_stream::CdrOutputStream;

mod encapsulation;
mod endian;
mod input_stream;
mod output_stream;
