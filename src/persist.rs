//! Persistent buffers: byte views tied to the storage that owns them.
//!
//! A [`PersistentBuffer`] is what the write path queues: a read-only byte
//! view plus an opaque owner that keeps the bytes alive until the
//! asynchronous write completes. Clones share the owner; the last clone
//! dropped releases it exactly once.
//!
//! The storage is established *before* the view exists — every
//! constructor here moves or copies the bytes into owned storage (or
//! requires a `'static` borrow), so a view into freed memory cannot be
//! formed. `Bytes` provides the reference-counted storage;
//! [`from_owner`] ties an arbitrary container's lifetime to the view
//! without copying.
//!
//! # Example
//!
//! ```
//! use framewire::persist::{self, PersistentBuffer};
//!
//! let owned: PersistentBuffer = vec![1u8, 2, 3].into();            // moved
//! let literal: PersistentBuffer = (&b"static bytes"[..]).into();   // borrowed
//! let copy = persist::copied(&[9u8, 9][..]);                       // copied
//! assert_eq!(owned.len(), 3);
//! assert_eq!(literal.as_slice(), b"static bytes");
//! assert_eq!(copy.len(), 2);
//! ```

use bytes::{Bytes, BytesMut};

use crate::any::Any;

/// A read-only byte view whose storage outlives every queued write.
#[derive(Clone, Debug)]
pub struct PersistentBuffer {
    view: Bytes,
    /// Extra opaque owner kept alive alongside the view, when the caller
    /// ties one on with [`PersistentBuffer::with_storage`].
    storage: Option<Any>,
}

impl PersistentBuffer {
    /// An empty buffer.
    pub fn empty() -> Self {
        Self {
            view: Bytes::new(),
            storage: None,
        }
    }

    /// Tie an additional opaque owner to a view. The owner is released
    /// when the last clone of this buffer is dropped.
    pub fn with_storage(view: Bytes, storage: Any) -> Self {
        Self {
            view,
            storage: Some(storage),
        }
    }

    /// The viewed bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.view
    }

    /// Length of the view in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// Check whether the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// The view as shared `Bytes`.
    #[inline]
    pub fn view(&self) -> &Bytes {
        &self.view
    }

    /// The extra storage owner, if one was attached.
    #[inline]
    pub fn storage(&self) -> Option<&Any> {
        self.storage.as_ref()
    }

    /// Cap the view to at most `n` bytes. Storage is untouched.
    pub fn truncate(&mut self, n: usize) {
        self.view.truncate(n);
    }
}

impl From<Bytes> for PersistentBuffer {
    fn from(view: Bytes) -> Self {
        Self {
            view,
            storage: None,
        }
    }
}

impl From<BytesMut> for PersistentBuffer {
    fn from(buf: BytesMut) -> Self {
        buf.freeze().into()
    }
}

impl From<Vec<u8>> for PersistentBuffer {
    fn from(vec: Vec<u8>) -> Self {
        Bytes::from(vec).into()
    }
}

impl From<Box<[u8]>> for PersistentBuffer {
    fn from(slice: Box<[u8]>) -> Self {
        Bytes::from(slice).into()
    }
}

impl From<String> for PersistentBuffer {
    fn from(s: String) -> Self {
        Bytes::from(s.into_bytes()).into()
    }
}

impl From<&'static [u8]> for PersistentBuffer {
    fn from(slice: &'static [u8]) -> Self {
        Bytes::from_static(slice).into()
    }
}

impl From<&'static str> for PersistentBuffer {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl<const N: usize> From<[u8; N]> for PersistentBuffer {
    /// Plain-old-data case: the array's bytes are copied into storage.
    fn from(array: [u8; N]) -> Self {
        Bytes::copy_from_slice(&array).into()
    }
}

/// Copy the bytes of a non-`'static` slice into fresh storage.
pub fn copied(data: &[u8]) -> PersistentBuffer {
    Bytes::copy_from_slice(data).into()
}

/// Copy a plain-old-data value's bytes into storage.
///
/// Takes anything viewable as bytes — arrays, encoded integers, header
/// structs with an `AsRef<[u8]>` impl — and stores the bytes by value:
///
/// ```
/// use framewire::persist;
///
/// let prefix = persist::value(130u32.to_le_bytes());
/// assert_eq!(prefix.as_slice(), &[130, 0, 0, 0]);
/// ```
pub fn value<T: AsRef<[u8]>>(pod: T) -> PersistentBuffer {
    Bytes::copy_from_slice(pod.as_ref()).into()
}

/// Move an owning container into storage and view its bytes in place.
///
/// The container is not copied; it is kept alive inside the buffer until
/// every clone is dropped.
pub fn from_owner<T>(owner: T) -> PersistentBuffer
where
    T: AsRef<[u8]> + Send + 'static,
{
    Bytes::from_owner(owner).into()
}

/// Build a buffer from anything convertible, capping the view at `n`
/// bytes.
pub fn truncated(buf: impl Into<PersistentBuffer>, n: usize) -> PersistentBuffer {
    let mut buf = buf.into();
    buf.truncate(n);
    buf
}
