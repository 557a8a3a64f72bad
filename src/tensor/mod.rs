//! Tensor store: binds a container's tensor directory to typed views over
//! its mapped byte ranges (spec ch. 4.2).

pub mod kernels;
mod view;

pub use view::TensorView;

use crate::container::{Container, TensorEntry};
use crate::error::LoadError;

/// Builds a [`TensorView`] for `entry` borrowed from `container`'s mapping.
pub fn view_for<'a>(container: &'a Container, entry: &TensorEntry) -> Result<TensorView<'a>, LoadError> {
    let bytes = container.tensor_bytes(entry)?;
    Ok(TensorView::new(bytes, entry.element_type, entry.element_count() as usize))
}

/// Looks up `name` in `container` and builds its view, failing with
/// `MissingRequiredTensor` if absent.
pub fn require_view<'a>(container: &'a Container, name: &str) -> Result<TensorView<'a>, LoadError> {
    let entry = container.require_tensor(name)?;
    view_for(container, entry)
}
