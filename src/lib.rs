/*!
In-memory patcher for uncompressed bsdiff 4.x (`BSDIFF40`) patches.

The patch carries no compression: a 32-byte header is followed directly by
the control, diff and extra sections.

```
fn patch(source: &[u8], patch: &[u8]) -> ubspatch::Result<Vec<u8>> {
    ubspatch::apply(source, patch)
}
```
*/

pub mod bspatch;
pub mod error;
mod utils;

pub use bspatch::{parse_header, Bspatch, Header, CONTROL_SIZE, HEADER_SIZE, MAGIC};
pub use error::{Corruption, Error, Result};
pub use utils::decode_offset;

/// Apply `patch` to `original` and return the reconstructed target.
pub fn apply(original: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    Bspatch::new(patch)?.apply(original)
}

/// Like `apply`, for callers whose buffers may be absent.
///
/// A missing buffer is reported as `Error::Argument` before the patch is
/// looked at.
pub fn apply_args(original: Option<&[u8]>, patch: Option<&[u8]>) -> Result<Vec<u8>> {
    let original = original.ok_or(Error::Argument("missing original"))?;
    let patch = patch.ok_or(Error::Argument("missing patch"))?;
    apply(original, patch)
}
