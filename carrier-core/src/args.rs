//! Positional JSON arguments of one command.

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::BridgeError;
use crate::handle::Handle;

/// Typed accessors over a command's argument array. Every accessor fails with
/// [`BridgeError::InvalidArgument`] on a missing or mistyped value.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    values: &'a [Value],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, i: usize) -> Result<&'a Value, BridgeError> {
        match self.values.get(i) {
            Some(Value::Null) | None => Err(BridgeError::invalid_argument(format!(
                "missing argument {i}"
            ))),
            Some(v) => Ok(v),
        }
    }

    fn mistyped(i: usize, expected: &str) -> BridgeError {
        BridgeError::invalid_argument(format!("argument {i} must be {expected}"))
    }

    pub fn int(&self, i: usize) -> Result<i64, BridgeError> {
        self.value(i)?
            .as_i64()
            .ok_or_else(|| Self::mistyped(i, "an integer"))
    }

    pub fn i32(&self, i: usize) -> Result<i32, BridgeError> {
        i32::try_from(self.int(i)?).map_err(|_| Self::mistyped(i, "a 32-bit integer"))
    }

    pub fn u32(&self, i: usize) -> Result<u32, BridgeError> {
        u32::try_from(self.int(i)?).map_err(|_| Self::mistyped(i, "an unsigned 32-bit integer"))
    }

    pub fn u64(&self, i: usize) -> Result<u64, BridgeError> {
        self.value(i)?
            .as_u64()
            .ok_or_else(|| Self::mistyped(i, "a non-negative integer"))
    }

    /// An object id. Only the type is checked here; a number that can never be a live
    /// id (zero, negative, too large) maps to [`Handle::UNISSUED`] and fails at lookup.
    pub fn handle(&self, i: usize) -> Result<Handle, BridgeError> {
        let v = self.value(i)?;
        if !v.is_i64() && !v.is_u64() {
            return Err(Self::mistyped(i, "an object id"));
        }
        Ok(v.as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .and_then(Handle::from_raw)
            .unwrap_or(Handle::UNISSUED))
    }

    pub fn string(&self, i: usize) -> Result<String, BridgeError> {
        self.value(i)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Self::mistyped(i, "a string"))
    }

    /// Like [`string`](Self::string) but rejects "".
    pub fn non_empty(&self, i: usize) -> Result<String, BridgeError> {
        let s = self.string(i)?;
        if s.is_empty() {
            return Err(BridgeError::invalid_argument(format!(
                "argument {i} must be a non-empty string"
            )));
        }
        Ok(s)
    }

    /// Absent or null is `None`; anything else must be a string.
    pub fn opt_string(&self, i: usize) -> Result<Option<String>, BridgeError> {
        match self.values.get(i) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Self::mistyped(i, "a string or null")),
        }
    }

    /// Port given either as a string or a number; callers send both.
    pub fn port(&self, i: usize) -> Result<String, BridgeError> {
        match self.value(i)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) if n.as_u64().is_some_and(|p| p <= u16::MAX as u64) => {
                Ok(n.to_string())
            }
            _ => Err(Self::mistyped(i, "a port")),
        }
    }

    pub fn base64(&self, i: usize) -> Result<Vec<u8>, BridgeError> {
        // Line-wrapped encoders (MIME style) are accepted.
        let s: String = self
            .string(i)?
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| BridgeError::invalid_argument(format!("argument {i} is not base64: {e}")))
    }

    pub fn base58(&self, i: usize) -> Result<Vec<u8>, BridgeError> {
        let s = self.non_empty(i)?;
        bs58::decode(&s)
            .into_vec()
            .map_err(|e| BridgeError::invalid_argument(format!("argument {i} is not base58: {e}")))
    }

    pub fn object<T: DeserializeOwned>(&self, i: usize) -> Result<T, BridgeError> {
        let v = self.value(i)?;
        serde_json::from_value(v.clone())
            .map_err(|e| BridgeError::invalid_argument(format!("argument {i}: {e}")))
    }

    pub fn opt_object<T: DeserializeOwned>(&self, i: usize) -> Result<Option<T>, BridgeError> {
        match self.values.get(i) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.object(i).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_mistyped_are_invalid_arguments() {
        let v = [json!("x")];
        let args = Args::new(&v);
        assert!(args.int(0).unwrap_err().is_invalid_argument());
        assert!(args.string(1).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn impossible_ids_never_resolve() {
        let v = [json!(0), json!(-4), json!(u64::MAX), json!(12), json!("7")];
        let args = Args::new(&v);
        for i in 0..3 {
            assert_eq!(args.handle(i).unwrap(), Handle::UNISSUED);
        }
        assert_eq!(args.handle(3).unwrap().raw(), 12);
        assert!(args.handle(4).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn base64_payloads_decode() {
        let v = [json!("aGk="), json!("@@")];
        let args = Args::new(&v);
        assert_eq!(args.base64(0).unwrap(), b"hi");
        assert!(args.base64(1).is_err());
    }

    #[test]
    fn optional_strings() {
        let v = [json!(null), json!("r"), json!(3)];
        let args = Args::new(&v);
        assert_eq!(args.opt_string(0).unwrap(), None);
        assert_eq!(args.opt_string(1).unwrap().as_deref(), Some("r"));
        assert!(args.opt_string(2).is_err());
        assert_eq!(args.opt_string(9).unwrap(), None);
    }

    #[test]
    fn ports_accept_strings_and_numbers() {
        let v = [json!("8080"), json!(22), json!(70000)];
        let args = Args::new(&v);
        assert_eq!(args.port(0).unwrap(), "8080");
        assert_eq!(args.port(1).unwrap(), "22");
        assert!(args.port(2).is_err());
    }
}
