//! Object addressing
//!
//! Address profiles and their tagged components, object key text forms,
//! and the resolvers turning `iiop://` and `corbaloc:` locators into
//! profiles.

pub use iiop_loc::{AddressResolver, DEFAULT_PORT};
pub use object_key::{escape_non_ascii, key_bytes_for_id, object_key_to_string, unescape_non_ascii};
pub use profile::{
    association_options, AddressProfile, ConnectionKey, Scheme, SslComponentData,
    TaggedComponent, TAG_CODE_SETS, TAG_INTERNET_IOP, TAG_SSL_SEC_TRANS,
};

mod corbaloc;
mod iiop_loc;
mod object_key;
mod profile;
