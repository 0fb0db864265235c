//! Temporary keys for new entities.

use crate::error::{CacheError, CacheResult};
use crate::metadata::DataType;
use crate::value::KeyValue;
use uuid::Uuid;

/// Produces placeholder keys for entities whose real key the server assigns.
///
/// Integer keys count down from the configured seed (-1, -2, ...) so they
/// never collide with server identities. GUID keys are random. Text keys
/// use a `K_<n>` counter.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    next_integer: i64,
    next_text: u64,
}

impl KeyGenerator {
    /// Creates a generator whose first integer key is `seed`.
    pub fn new(seed: i64) -> Self {
        Self {
            next_integer: seed,
            next_text: 1,
        }
    }

    /// Generates a key value for `data_type`, skipping values for which
    /// `is_taken` returns true.
    pub fn generate(
        &mut self,
        data_type: DataType,
        is_taken: impl Fn(&KeyValue) -> bool,
    ) -> CacheResult<KeyValue> {
        loop {
            let candidate = match data_type {
                DataType::Int32 | DataType::Int64 => {
                    let value = self.next_integer;
                    self.next_integer -= 1;
                    if data_type == DataType::Int32 && i32::try_from(value).is_err() {
                        return Err(CacheError::invalid_operation(
                            "temporary Int32 key space exhausted",
                        ));
                    }
                    KeyValue::Integer(value)
                }
                DataType::Guid => KeyValue::Guid(Uuid::new_v4()),
                DataType::String => {
                    let value = format!("K_{}", self.next_text);
                    self.next_text += 1;
                    KeyValue::Text(value)
                }
                other => {
                    return Err(CacheError::invalid_operation(format!(
                        "cannot generate a key of type {other:?}"
                    )))
                }
            };
            if !is_taken(&candidate) {
                return Ok(candidate);
            }
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(-1)
    }
}
