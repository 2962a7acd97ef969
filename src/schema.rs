//! Entry type identity and the schema handshake.
//!
//! A remote stream and its replica must agree on the entry type before a
//! single record is ingested. Agreement is structural: both sides exchange a
//! [`SchemaDescriptor`] (a stable type fingerprint plus the entry and
//! namespace names) and compare it field by field.
//!
//! The fingerprint is derived from a [`StreamEntry::type_signature()`], a
//! short textual description of the entry's wire layout. Two builds produce
//! the same `type_id` exactly when their signatures agree, so renaming a Rust
//! type is harmless while adding or retyping a field is not.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Namespace reported by streams that do not set one explicitly.
pub const DEFAULT_NAMESPACE_NAME: &str = "default";

/// Identity of an entry type on the wire.
///
/// Served by the remote at `GET {base}/schema.simple` and compared
/// structurally against the local type before any subscription proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Stable fingerprint of the entry's wire layout.
    pub type_id: String,
    /// Human-readable entry name.
    pub entry_name: String,
    /// Namespace the entry belongs to.
    pub namespace_name: String,
}

impl std::fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} ({})",
            self.namespace_name, self.entry_name, self.type_id
        )
    }
}

/// A payload type that can ride on a replicated stream.
///
/// Entries are JSON on the wire, so `Serialize`/`DeserializeOwned` are the
/// only encoding requirements. The one thing implementors must provide is a
/// stable [`type_signature()`](StreamEntry::type_signature): keep it in sync
/// with the serialized shape, not the Rust type name.
pub trait StreamEntry: Serialize + DeserializeOwned + Send + 'static {
    /// Stable description of this type's wire layout.
    ///
    /// Conventionally `"field:type,field:type,..."` in declaration order.
    fn type_signature() -> String;

    /// Entry name reported in the schema handshake.
    ///
    /// Defaults to the bare Rust type name.
    fn entry_name() -> String {
        short_type_name::<Self>().to_string()
    }
}

/// Compute the schema descriptor for an entry type.
///
/// `entry_name` and `namespace_name` override the defaults derived from the
/// type itself; pass `None` to keep them.
pub fn reflect<E: StreamEntry>(
    entry_name: Option<&str>,
    namespace_name: Option<&str>,
) -> SchemaDescriptor {
    SchemaDescriptor {
        type_id: type_id_for(&E::type_signature()),
        entry_name: entry_name
            .map(str::to_string)
            .unwrap_or_else(E::entry_name),
        namespace_name: namespace_name
            .unwrap_or(DEFAULT_NAMESPACE_NAME)
            .to_string(),
    }
}

/// Derive a type fingerprint from a signature string.
///
/// SHA-256, truncated to 8 bytes, hex-encoded with a `T` prefix.
pub fn type_id_for(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    format!("T{}", hex::encode(&digest[..8]))
}

/// Bare type name without module path.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
