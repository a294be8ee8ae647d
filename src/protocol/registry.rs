//! Tag-indexed tables of structure rules.
//!
//! A [`StructRegistry`] maps the tag byte of a structure to the [`StructRule`]
//! that reads and writes it. There is one registry per direction (requests,
//! responses) plus one for structures nested inside values. Registries are
//! immutable; a newer protocol version builds its own by inheriting the
//! previous one and applying `register`/`unregister` deltas in order.
use std::fmt;

use log::trace;
use thiserror::Error;

use crate::packstream::{PackError, Packer, StructHeader, StructResolver, Unpacker, Value};

const TAG_SPACE: usize = 256;

/// Messages that know which structure tag they are written with.
pub trait Tagged {
    fn tag(&self) -> u8;
}

/// Reads and writes one kind of structure.
///
/// `read` is handed the unpacker right after the header, with the field count
/// already checked against `fields`. `write` emits the whole structure,
/// header included.
pub struct StructRule<M> {
    pub tag: u8,
    pub name: &'static str,
    pub fields: usize,
    pub read: fn(&mut Unpacker<'_>) -> Result<M, PackError>,
    pub write: fn(&M, &mut Packer) -> Result<(), PackError>,
}

impl<M> Clone for StructRule<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for StructRule<M> {}

impl<M> fmt::Debug for StructRule<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{:#04x}/{}>", self.name, self.tag, self.fields)
    }
}

impl<M> PartialEq for StructRule<M> {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.name == other.name && self.fields == other.fields
    }
}

impl<M> Eq for StructRule<M> {}

/// Construction-time mistakes in a registry delta list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cannot register {name}: tag {tag:#04x} already taken by {existing}")]
    Duplicate {
        tag: u8,
        name: &'static str,
        existing: &'static str,
    },

    #[error("cannot unregister {name}: not present at tag {tag:#04x}")]
    NotRegistered { tag: u8, name: &'static str },
}

pub struct StructRegistry<M> {
    rules: Vec<Option<StructRule<M>>>,
}

impl<M> Clone for StructRegistry<M> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
        }
    }
}

impl<M> fmt::Debug for StructRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rules()).finish()
    }
}

impl<M> Default for StructRegistry<M> {
    fn default() -> Self {
        Self {
            rules: vec![None; TAG_SPACE],
        }
    }
}

impl<M> StructRegistry<M> {
    pub fn builder() -> StructRegistryBuilder<M> {
        StructRegistryBuilder::default()
    }

    pub fn get(&self, tag: u8) -> Option<&StructRule<M>> {
        self.rules[tag as usize].as_ref()
    }

    pub fn contains(&self, rule: &StructRule<M>) -> bool {
        self.get(rule.tag) == Some(rule)
    }

    pub fn rules(&self) -> impl Iterator<Item = &StructRule<M>> {
        self.rules.iter().flatten()
    }

    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.rules().map(|rule| rule.tag)
    }

    pub fn len(&self) -> usize {
        self.rules().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads one structure: header, rule lookup, field count check, fields.
    pub fn read(&self, unpacker: &mut Unpacker<'_>) -> Result<M, PackError> {
        let header = unpacker.unpack_struct_header()?;
        self.read_fields(unpacker, header)
    }

    fn read_fields(&self, unpacker: &mut Unpacker<'_>, header: StructHeader) -> Result<M, PackError> {
        let rule = self.get(header.tag).ok_or(PackError::UnexpectedStruct {
            tag: header.tag,
            length: header.length,
        })?;
        if header.length != rule.fields {
            return Err(PackError::WrongFieldCount {
                structure: rule.name,
                expected: rule.fields,
                found: header.length,
            });
        }
        trace!("reading {rule:?}");
        (rule.read)(unpacker)
    }
}

impl<M: Tagged> StructRegistry<M> {
    pub fn write(&self, message: &M, packer: &mut Packer) -> Result<(), PackError> {
        let tag = message.tag();
        let rule = self
            .get(tag)
            .ok_or(PackError::UnexpectedStruct { tag, length: 0 })?;
        trace!("writing {rule:?}");
        (rule.write)(message, packer)
    }
}

impl StructResolver for StructRegistry<Value> {
    fn read_struct(
        &self,
        unpacker: &mut Unpacker<'_>,
        header: StructHeader,
    ) -> Result<Value, PackError> {
        self.read_fields(unpacker, header)
    }
}

enum Delta<M> {
    Register(StructRule<M>),
    Unregister(StructRule<M>),
}

/// Collects an inherited table and the deltas applied on top of it.
pub struct StructRegistryBuilder<M> {
    base: StructRegistry<M>,
    deltas: Vec<Delta<M>>,
}

impl<M> Default for StructRegistryBuilder<M> {
    fn default() -> Self {
        Self {
            base: StructRegistry::default(),
            deltas: Vec::new(),
        }
    }
}

impl<M> StructRegistryBuilder<M> {
    pub fn inherit_from(mut self, registry: &StructRegistry<M>) -> Self {
        self.base = registry.clone();
        self
    }

    pub fn register(mut self, rule: StructRule<M>) -> Self {
        self.deltas.push(Delta::Register(rule));
        self
    }

    pub fn unregister(mut self, rule: StructRule<M>) -> Self {
        self.deltas.push(Delta::Unregister(rule));
        self
    }

    /// Applies the deltas in declaration order. Registering over an occupied
    /// tag or unregistering a rule the table does not hold at that point
    /// fails the whole build.
    pub fn build(self) -> Result<StructRegistry<M>, RegistryError> {
        let mut registry = self.base;
        for delta in self.deltas {
            match delta {
                Delta::Register(rule) => {
                    let slot = &mut registry.rules[rule.tag as usize];
                    if let Some(existing) = slot {
                        return Err(RegistryError::Duplicate {
                            tag: rule.tag,
                            name: rule.name,
                            existing: existing.name,
                        });
                    }
                    *slot = Some(rule);
                }
                Delta::Unregister(rule) => {
                    let slot = &mut registry.rules[rule.tag as usize];
                    if slot.as_ref() != Some(&rule) {
                        return Err(RegistryError::NotRegistered {
                            tag: rule.tag,
                            name: rule.name,
                        });
                    }
                    *slot = None;
                }
            }
        }
        Ok(registry)
    }
}
