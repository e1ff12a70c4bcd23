//! Typed tensors over caller-owned host memory
//!
//! A [`Tensor`] owns a `Vec<T>` and a native `OrtValue` created over that
//! buffer without copying. The vector is never resized while the handle is
//! live, so the pointer the runtime holds stays valid until `destroy`.

use crate::environment::Runtime;
use crate::error::{OnnxError, Result};
use crate::ffi::{OrtMemoryInfo, OrtValue};
use crate::types::{TensorElementDataType, ValueType, ALLOCATOR_TYPE_ARENA, MEM_TYPE_DEFAULT};
use std::fmt;
use std::os::raw::c_void;
use std::ptr::{self, NonNull};
use std::str::FromStr;
use std::sync::Arc;

/// Tensor dimensions
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape(Vec<i64>);

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Product of all dimensions.
    ///
    /// Negative dimensions and overflow are errors. A rank-0 shape is a
    /// scalar with one element.
    pub fn element_count(&self) -> Result<usize> {
        let mut count: usize = 1;
        for &dim in &self.0 {
            if dim < 0 {
                return Err(OnnxError::InvalidShape(format!(
                    "negative dimension {} in {}",
                    dim, self
                )));
            }
            count = count
                .checked_mul(dim as usize)
                .ok_or_else(|| OnnxError::InvalidShape(format!("{} overflows", self)))?;
        }
        Ok(count)
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Self(dims)
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[i64; N]> for Shape {
    fn from(dims: [i64; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")
    }
}

/// Parses `"[1, 3, 224]"`, `"1x3x224"` or `"1,3,224"`.
impl FromStr for Shape {
    type Err = OnnxError;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s.trim().trim_start_matches('[').trim_end_matches(']').trim();
        if inner.is_empty() {
            return Ok(Shape::default());
        }
        let dims = inner
            .split(|c: char| c == ',' || c == 'x')
            .map(|part| {
                let part = part.trim();
                match part.parse::<i64>() {
                    Ok(dim) if dim >= 0 => Ok(dim),
                    _ => Err(OnnxError::InvalidShape(format!(
                        "bad dimension {:?} in {:?}",
                        part, s
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Shape(dims))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types a [`Tensor`] can hold
pub trait TensorElement: Copy + Default + Send + Sync + 'static + sealed::Sealed {
    const DATA_TYPE: TensorElementDataType;
}

macro_rules! impl_tensor_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl TensorElement for $ty {
                const DATA_TYPE: TensorElementDataType = TensorElementDataType::$variant;
            }
        )*
    };
}

impl_tensor_element! {
    f32 => Float,
    f64 => Double,
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    i64 => Int64,
    u32 => Uint32,
    u64 => Uint64,
    bool => Bool,
}

/// Borrowed view of a live native value, used to bind values to a session.
///
/// Only this crate can construct one, so a session can only be bound to
/// values this crate created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle(NonNull<OrtValue>);

impl NativeHandle {
    pub(crate) fn as_ptr(self) -> *mut OrtValue {
        self.0.as_ptr()
    }
}

/// A native value owned by this crate; released exactly once by consuming it.
struct OwnedValue(NonNull<OrtValue>);

impl OwnedValue {
    fn release(self, runtime: &Runtime) {
        // SAFETY: the pointer came from CreateTensorWithDataAsOrtValue and
        // `self` is consumed, so it cannot be released twice.
        unsafe { (runtime.api().release_value)(self.0.as_ptr()) }
    }
}

/// Something that can be bound as a session input or output
pub trait Value: Send + sealed::Sealed {
    fn value_type(&self) -> ValueType;

    /// Handle of the live native value; `None` once destroyed.
    fn native_handle(&self) -> Option<NativeHandle>;

    /// Release the native value. Idempotent.
    fn destroy(&mut self) -> Result<()>;
}

/// CPU memory description, released when dropped.
struct MemoryInfo<'a> {
    ptr: NonNull<OrtMemoryInfo>,
    runtime: &'a Runtime,
}

impl<'a> MemoryInfo<'a> {
    fn cpu(runtime: &'a Runtime) -> Result<Self> {
        let api = runtime.api();
        let mut info: *mut OrtMemoryInfo = ptr::null_mut();
        // SAFETY: `info` is a valid out-pointer; the status is checked.
        unsafe {
            api.check(
                (api.create_cpu_memory_info)(ALLOCATOR_TYPE_ARENA, MEM_TYPE_DEFAULT, &mut info),
                "CreateCpuMemoryInfo",
            )?;
        }
        let ptr = NonNull::new(info).ok_or_else(|| OnnxError::Native {
            context: "CreateCpuMemoryInfo".to_string(),
            code: crate::types::ErrorCode::Fail,
            message: "returned null memory info".to_string(),
        })?;
        Ok(Self { ptr, runtime })
    }
}

impl Drop for MemoryInfo<'_> {
    fn drop(&mut self) {
        // SAFETY: created by CreateCpuMemoryInfo and released only here.
        unsafe { (self.runtime.api().release_memory_info)(self.ptr.as_ptr()) }
    }
}

/// A shaped host buffer bound to a native tensor value
pub struct Tensor<T: TensorElement> {
    shape: Shape,
    data: Vec<T>,
    handle: Option<OwnedValue>,
    runtime: Option<Arc<Runtime>>,
}

impl<T: TensorElement> Tensor<T> {
    /// Wrap `data` as a native tensor of `shape` without copying.
    pub fn new(runtime: &Arc<Runtime>, shape: impl Into<Shape>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape.element_count()?;
        if data.len() != expected {
            return Err(OnnxError::DataLengthMismatch {
                shape: shape.to_string(),
                expected,
                actual: data.len(),
            });
        }

        let mut data = data;
        let handle = create_value::<T>(runtime, &shape, &mut data)?;
        Ok(Self {
            shape,
            data,
            handle: Some(handle),
            runtime: Some(Arc::clone(runtime)),
        })
    }

    /// A zero-filled tensor of `shape`.
    pub fn new_empty(runtime: &Arc<Runtime>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        let count = shape.element_count()?;
        Self::new(runtime, shape, vec![T::default(); count])
    }

    /// Backing data; empty after `destroy`.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the backing data.
    ///
    /// Writes are visible to the runtime on the next `run`. The length cannot
    /// change, so the buffer never moves while the native value is live.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Shape; empty after `destroy`.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    fn release(&mut self) -> bool {
        let released = match (self.handle.take(), self.runtime.take()) {
            (Some(handle), Some(runtime)) => {
                handle.release(&runtime);
                true
            }
            _ => false,
        };
        // Only free the buffer once the native value no longer points at it.
        self.data = Vec::new();
        self.shape = Shape::default();
        released
    }
}

fn create_value<T: TensorElement>(
    runtime: &Runtime,
    shape: &Shape,
    data: &mut [T],
) -> Result<OwnedValue> {
    let info = MemoryInfo::cpu(runtime)?;
    let byte_len = std::mem::size_of_val(data);
    let api = runtime.api();
    let mut value: *mut OrtValue = ptr::null_mut();
    // SAFETY: `data` is a live buffer of `byte_len` bytes whose owner keeps it
    // in place until the returned value is released; the dims slice outlives
    // the call and `value` is a valid out-pointer.
    unsafe {
        api.check(
            (api.create_tensor_with_data_as_ort_value)(
                info.ptr.as_ptr(),
                data.as_mut_ptr() as *mut c_void,
                byte_len,
                shape.dims().as_ptr(),
                shape.rank(),
                T::DATA_TYPE.as_raw(),
                &mut value,
            ),
            "CreateTensorWithDataAsOrtValue",
        )?;
    }
    NonNull::new(value).map(OwnedValue).ok_or_else(|| OnnxError::Native {
        context: "CreateTensorWithDataAsOrtValue".to_string(),
        code: crate::types::ErrorCode::Fail,
        message: "returned null value".to_string(),
    })
}

impl<T: TensorElement> sealed::Sealed for Tensor<T> {}

impl<T: TensorElement> Value for Tensor<T> {
    fn value_type(&self) -> ValueType {
        ValueType::Tensor
    }

    fn native_handle(&self) -> Option<NativeHandle> {
        self.handle.as_ref().map(|h| NativeHandle(h.0))
    }

    fn destroy(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl<T: TensorElement> Drop for Tensor<T> {
    fn drop(&mut self) {
        if self.release() {
            log::debug!("Tensor {} released on drop", std::any::type_name::<T>());
        }
    }
}

impl<T: TensorElement> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("element", &T::DATA_TYPE)
            .field("shape", &self.shape)
            .field("live", &self.handle.is_some())
            .finish()
    }
}

// SAFETY: the native value is only touched through &mut self or by a session
// run that borrows the tensor, and OrtValue has no thread affinity.
unsafe impl<T: TensorElement> Send for Tensor<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached<T: TensorElement>(shape: &[i64], data: Vec<T>) -> Tensor<T> {
        Tensor {
            shape: Shape::from(shape),
            data,
            handle: None,
            runtime: None,
        }
    }

    #[test]
    fn test_element_count() {
        assert_eq!(Shape::from([2, 3, 4]).element_count().unwrap(), 24);
        assert_eq!(Shape::from([5, 0]).element_count().unwrap(), 0);
        assert_eq!(Shape::default().element_count().unwrap(), 1);
    }

    #[test]
    fn test_element_count_rejects_negative() {
        let result = Shape::from([2, -1]).element_count();
        assert!(matches!(result, Err(OnnxError::InvalidShape(_))));
    }

    #[test]
    fn test_element_count_rejects_overflow() {
        let result = Shape::from([i64::MAX, i64::MAX, 4]).element_count();
        assert!(matches!(result, Err(OnnxError::InvalidShape(_))));
    }

    #[test]
    fn test_shape_parse_forms() {
        let expected = Shape::from([1, 3, 224]);
        assert_eq!("[1, 3, 224]".parse::<Shape>().unwrap(), expected);
        assert_eq!("1x3x224".parse::<Shape>().unwrap(), expected);
        assert_eq!("1,3,224".parse::<Shape>().unwrap(), expected);
        assert_eq!("[]".parse::<Shape>().unwrap(), Shape::default());
        assert!("[1, a]".parse::<Shape>().is_err());
        assert!("1,,384".parse::<Shape>().is_err());
        assert!("1,-1".parse::<Shape>().is_err());
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(Shape::from([2, 8]).to_string(), "[2, 8]");
    }

    #[test]
    fn test_destroy_is_idempotent_and_clears() {
        let mut tensor = detached(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]);
        tensor.destroy().unwrap();
        assert!(tensor.data().is_empty());
        assert!(tensor.shape().is_empty());
        assert!(tensor.native_handle().is_none());
        tensor.destroy().unwrap();
        assert!(tensor.is_destroyed());
    }

    #[test]
    fn test_data_type_mapping() {
        assert_eq!(<f32 as TensorElement>::DATA_TYPE, TensorElementDataType::Float);
        assert_eq!(<i64 as TensorElement>::DATA_TYPE, TensorElementDataType::Int64);
        assert_eq!(<bool as TensorElement>::DATA_TYPE, TensorElementDataType::Bool);
    }
}
