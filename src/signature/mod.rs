//! Signature parsing and the codec tree it compiles to.

pub use self::codec::{Codec, Fixed};
mod codec;

pub use self::marshal_error::MarshalError;
mod marshal_error;

pub use self::parser::parse;
mod parser;

pub use self::signature_error::SignatureError;
pub(crate) use self::signature_error::SignatureErrorKind;
mod signature_error;


use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The maximum length of a signature in bytes.
pub(crate) const MAX_SIGNATURE: usize = 255;

/// The maximum nesting depth of arrays, and separately of structs and dict
/// entries.
pub(crate) const MAX_CONTAINER_DEPTH: usize = 32;

/// The maximum combined container nesting depth.
pub(crate) const MAX_DEPTH: usize = MAX_CONTAINER_DEPTH * 2;

/// The concatenated canonical signature of a codec list.
pub fn signature_of(codecs: &[Codec]) -> String {
    let mut out = String::new();

    for codec in codecs {
        codec.write_signature(&mut out);
    }

    out
}

/// An interning table from signature strings to shared codec lists.
///
/// Compiling through the cache de-duplicates storage and skips re-parsing;
/// the introspection layer uses it for its lazily compiled argument codecs.
///
/// # Examples
///
/// ```
/// use minibus::signature::CodecCache;
///
/// let cache = CodecCache::new();
/// let a = cache.compile("a(is)")?;
/// let b = cache.compile("a(is)")?;
/// assert_eq!(a, b);
/// # Ok::<_, minibus::SignatureError>(())
/// ```
#[derive(Debug, Default)]
pub struct CodecCache {
    map: RefCell<HashMap<Box<str>, Rc<[Codec]>>>,
}

impl CodecCache {
    /// Construct a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `signature`, reusing a previously compiled codec list when one
    /// exists.
    pub fn compile(&self, signature: &str) -> Result<Rc<[Codec]>, SignatureError> {
        if let Some(codecs) = self.map.borrow().get(signature) {
            return Ok(Rc::clone(codecs));
        }

        let codecs = Rc::<[Codec]>::from(parse(signature)?);

        self.map
            .borrow_mut()
            .insert(signature.into(), Rc::clone(&codecs));

        Ok(codecs)
    }
}
