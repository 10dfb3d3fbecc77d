//! Typed attribute declarations and per-node attribute storage.
//!
//! An [`AttributeSchema`] belongs to a node type and declares named, typed
//! attributes together with their default values. Every node of that type
//! gets an [`AttributeInstance`] seeded from the schema when it is created.
//!
//! Values live in a packed byte blob addressed by per-attribute offsets.
//! String attributes store a slot index in the blob and own their text in a
//! side table, so every instance holds private copies of its strings.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::{GraphError, Result};

/// Maximum length of an attribute name in bytes.
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 8;

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Int,
    Float,
    Float3,
    String,
}

impl AttributeType {
    /// Bytes the attribute occupies in the value blob.
    pub fn stride(self) -> usize {
        match self {
            Self::Int => std::mem::size_of::<i32>(),
            Self::Float => std::mem::size_of::<f32>(),
            Self::Float3 => std::mem::size_of::<Vec3>(),
            Self::String => std::mem::size_of::<StringSlot>(),
        }
    }

    /// Number of scalar components a script must supply for this type.
    pub fn components(self) -> usize {
        match self {
            Self::Float3 => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An owned attribute value, used where the type is only known at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i32),
    Float(f32),
    Float3(Vec3),
    String(String),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Self::Int(_) => AttributeType::Int,
            Self::Float(_) => AttributeType::Float,
            Self::Float3(_) => AttributeType::Float3,
            Self::String(_) => AttributeType::String,
        }
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vec3> for AttributeValue {
    fn from(value: Vec3) -> Self {
        Self::Float3(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// An attribute name of at most eight bytes, packed into a `u64` for cheap
/// comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeName(u64);

impl AttributeName {
    /// Packs `name`, or returns `None` if it is longer than eight bytes.
    pub fn new(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > MAX_ATTRIBUTE_NAME_LEN {
            return None;
        }
        let mut packed = [0u8; MAX_ATTRIBUTE_NAME_LEN];
        packed[..bytes.len()].copy_from_slice(bytes);
        Some(Self(u64::from_le_bytes(packed)))
    }

}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        f.write_str(&String::from_utf8_lossy(&bytes[..len]))
    }
}

impl fmt::Debug for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeName({:?})", self.to_string())
    }
}

/// Position of an attribute within its schema.
///
/// Indices are stable for the lifetime of the schema and can be cached by
/// node types to skip name lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeIndex(u32);

impl AttributeIndex {
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// Blob representation of a string attribute: index into the string table.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct StringSlot(u32);

#[derive(Debug, Clone, Copy)]
struct Layout {
    ty: AttributeType,
    offset: u32,
}

/// Packed values plus their layout. Shared by schema defaults and instances.
#[derive(Debug, Clone, Default)]
struct AttributeStorage {
    layouts: Vec<Layout>,
    blob: Vec<u8>,
    strings: Vec<String>,
}

impl AttributeStorage {
    fn layout(&self, index: AttributeIndex, expected: AttributeType) -> Option<Layout> {
        let Some(layout) = self.layouts.get(index.get()).copied() else {
            debug_assert!(
                false,
                "attribute index {} out of range ({} attributes)",
                index.get(),
                self.layouts.len()
            );
            log::error!("Attribute index {} out of range", index.get());
            return None;
        };
        debug_assert_eq!(
            layout.ty,
            expected,
            "attribute {} accessed with the wrong type",
            index.get()
        );
        if layout.ty != expected {
            log::error!(
                "Attribute {} holds {}, accessed as {}",
                index.get(),
                layout.ty,
                expected
            );
            return None;
        }
        Some(layout)
    }

    fn read<T: Pod>(&self, offset: u32) -> T {
        let start = offset as usize;
        bytemuck::pod_read_unaligned(&self.blob[start..start + std::mem::size_of::<T>()])
    }

    fn write<T: Pod>(&mut self, offset: u32, value: T) {
        let start = offset as usize;
        self.blob[start..start + std::mem::size_of::<T>()]
            .copy_from_slice(bytemuck::bytes_of(&value));
    }

    fn string_slot(&self, offset: u32) -> usize {
        self.read::<StringSlot>(offset).0 as usize
    }

    fn push(&mut self, ty: AttributeType) -> AttributeIndex {
        let index = AttributeIndex(self.layouts.len() as u32);
        let offset = self.blob.len() as u32;

        // Grow by doubling like the blob does.
        if self.layouts.len() == self.layouts.capacity() {
            self.layouts.reserve(self.layouts.capacity().max(4));
        }
        self.layouts.push(Layout { ty, offset });
        self.blob.resize(self.blob.len() + ty.stride(), 0);

        if ty == AttributeType::String {
            let slot = StringSlot(self.strings.len() as u32);
            self.strings.push(String::new());
            self.write(offset, slot);
        }
        index
    }

    fn value(&self, index: usize) -> Option<AttributeValue> {
        let layout = self.layouts.get(index)?;
        Some(match layout.ty {
            AttributeType::Int => AttributeValue::Int(self.read(layout.offset)),
            AttributeType::Float => AttributeValue::Float(self.read(layout.offset)),
            AttributeType::Float3 => AttributeValue::Float3(self.read(layout.offset)),
            AttributeType::String => {
                AttributeValue::String(self.strings[self.string_slot(layout.offset)].clone())
            }
        })
    }

    /// Writes `value` at `index` after checking the declared type.
    fn set_value(&mut self, index: usize, value: &AttributeValue, name: &str) -> Result<()> {
        let layout = self
            .layouts
            .get(index)
            .copied()
            .ok_or_else(|| GraphError::AttributeNotFound(name.to_owned()))?;
        if layout.ty != value.attribute_type() {
            return Err(GraphError::AttributeTypeMismatch {
                name: name.to_owned(),
                expected: value.attribute_type(),
                found: layout.ty,
            });
        }
        match value {
            AttributeValue::Int(v) => self.write(layout.offset, *v),
            AttributeValue::Float(v) => self.write(layout.offset, *v),
            AttributeValue::Float3(v) => self.write(layout.offset, *v),
            AttributeValue::String(v) => {
                let slot = self.string_slot(layout.offset);
                self.strings[slot] = v.clone();
            }
        }
        Ok(())
    }
}

/// Per-type attribute declarations with default values.
#[derive(Debug, Clone, Default)]
pub struct AttributeSchema {
    names: Vec<AttributeName>,
    defaults: AttributeStorage,
}

impl AttributeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a new attribute with a zero (or empty string) default.
    ///
    /// Fails if the name is longer than eight bytes or already declared.
    pub fn add(&mut self, name: &str, ty: AttributeType) -> Result<AttributeIndex> {
        let packed = AttributeName::new(name)
            .ok_or_else(|| GraphError::AttributeNameTooLong(name.to_owned()))?;
        if self.names.contains(&packed) {
            return Err(GraphError::DuplicateAttribute(name.to_owned()));
        }

        if self.names.len() == self.names.capacity() {
            self.names.reserve(self.names.capacity().max(4));
        }
        self.names.push(packed);
        Ok(self.defaults.push(ty))
    }

    /// Declares a new attribute and sets its default in one step.
    pub fn add_with_default(
        &mut self,
        name: &str,
        default: impl Into<AttributeValue>,
    ) -> Result<AttributeIndex> {
        let default = default.into();
        let index = self.add(name, default.attribute_type())?;
        self.set_default_value(index, &default)?;
        Ok(index)
    }

    /// Replaces the default value of an attribute. Strings are deep-copied.
    pub fn set_default_value(
        &mut self,
        index: AttributeIndex,
        value: &AttributeValue,
    ) -> Result<()> {
        let name = self
            .names
            .get(index.get())
            .map(AttributeName::to_string)
            .unwrap_or_default();
        self.defaults.set_value(index.get(), value, &name)
    }

    /// Linear lookup by name.
    pub fn find(&self, name: &str) -> Option<AttributeIndex> {
        let packed = AttributeName::new(name)?;
        self.names
            .iter()
            .position(|n| *n == packed)
            .map(|i| AttributeIndex(i as u32))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: AttributeIndex) -> Option<String> {
        self.names.get(index.get()).map(AttributeName::to_string)
    }

    pub fn attribute_type(&self, index: AttributeIndex) -> Option<AttributeType> {
        self.defaults.layouts.get(index.get()).map(|l| l.ty)
    }

    pub fn default_value(&self, index: AttributeIndex) -> Option<AttributeValue> {
        self.defaults.value(index.get())
    }
}

/// Attribute values of one node.
///
/// The layout is copied from the schema when the instance is created and
/// never changes afterwards, even if the schema gains attributes later.
#[derive(Debug, Clone)]
pub struct AttributeInstance {
    storage: AttributeStorage,
}

impl AttributeInstance {
    /// Seeds a new instance from the schema defaults. String values are
    /// copied, never shared with the schema.
    pub fn create(schema: &AttributeSchema) -> Self {
        Self {
            storage: schema.defaults.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.layouts.is_empty()
    }

    /// Type of the attribute at `index`, or `None` if the instance predates it.
    pub fn attribute_type(&self, index: AttributeIndex) -> Option<AttributeType> {
        self.storage.layouts.get(index.get()).map(|l| l.ty)
    }

    /// Reads any attribute as an owned value.
    pub fn value(&self, index: AttributeIndex) -> Option<AttributeValue> {
        self.storage.value(index.get())
    }

    /// Writes any attribute, rejecting values of the wrong type.
    pub fn set_value(&mut self, index: AttributeIndex, value: &AttributeValue) -> Result<()> {
        self.storage
            .set_value(index.get(), value, &format!("#{}", index.get()))
    }

    // ---- Typed access by cached index ----
    //
    // The caller guarantees the index exists with the named type. A mismatch
    // panics in debug builds; release builds log it, read zero and skip writes.

    pub fn int(&self, index: AttributeIndex) -> i32 {
        self.storage
            .layout(index, AttributeType::Int)
            .map(|l| self.storage.read(l.offset))
            .unwrap_or_default()
    }

    pub fn float(&self, index: AttributeIndex) -> f32 {
        self.storage
            .layout(index, AttributeType::Float)
            .map(|l| self.storage.read(l.offset))
            .unwrap_or_default()
    }

    pub fn float3(&self, index: AttributeIndex) -> Vec3 {
        self.storage
            .layout(index, AttributeType::Float3)
            .map(|l| self.storage.read(l.offset))
            .unwrap_or_default()
    }

    pub fn string(&self, index: AttributeIndex) -> &str {
        match self.storage.layout(index, AttributeType::String) {
            Some(l) => &self.storage.strings[self.storage.string_slot(l.offset)],
            None => "",
        }
    }

    pub fn set_int(&mut self, index: AttributeIndex, value: i32) {
        if let Some(l) = self.storage.layout(index, AttributeType::Int) {
            self.storage.write(l.offset, value);
        }
    }

    pub fn set_float(&mut self, index: AttributeIndex, value: f32) {
        if let Some(l) = self.storage.layout(index, AttributeType::Float) {
            self.storage.write(l.offset, value);
        }
    }

    pub fn set_float3(&mut self, index: AttributeIndex, value: Vec3) {
        if let Some(l) = self.storage.layout(index, AttributeType::Float3) {
            self.storage.write(l.offset, value);
        }
    }

    /// Replaces the string, dropping the previous copy.
    pub fn set_string(&mut self, index: AttributeIndex, value: &str) {
        if let Some(l) = self.storage.layout(index, AttributeType::String) {
            let slot = self.storage.string_slot(l.offset);
            self.storage.strings[slot] = value.to_owned();
        }
    }
}
