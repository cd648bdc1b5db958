//! Expanded type graphs.
//!
//! Type expansion writes every node into a caller-owned [`TypeArena`]. The
//! arena has a fixed byte budget chosen up front; once it is spent further
//! allocations fail with [`SymError::OutOfMemory`](crate::error::SymError)
//! and the caller releases the whole graph by dropping (or clearing) the
//! arena. Nodes refer to each other by [`TypeRef`] handles, so cyclic
//! graphs such as self-referential structures need no special ownership.

use std::mem;
use std::ops::Range;

use crate::error::{Result, SymError};

/// Handle to a node stored in a [`TypeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);

impl TypeRef
{
    #[must_use]
    pub fn index(self) -> usize
    {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
enum Shape
{
    Func
    {
        ret: Option<TypeRef>,
        args: Range<usize>,
    },
    Ptr
    {
        target: Option<TypeRef>,
    },
    Array
    {
        element: Option<TypeRef>,
        count: u64,
    },
    Int
    {
        signed: bool,
    },
    Compound
    {
        name: Range<usize>,
        fields: Range<usize>,
    },
    Typedef
    {
        name: Range<usize>,
        target: Option<TypeRef>,
    },
    Void,
    Other
    {
        name: Range<usize>,
    },
}

#[derive(Debug, Clone)]
struct Slot
{
    id: u32,
    size: u64,
    shape: Shape,
}

/// Borrowed view of one expanded node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeNode<'a>
{
    /// Function or method signature. `ret` is `None` for an unknown return type.
    Func
    {
        ret: Option<TypeRef>,
        args: &'a [TypeRef],
    },
    /// Pointer or reference.
    Ptr
    {
        target: Option<TypeRef>,
    },
    /// Fixed-size array.
    Array
    {
        element: Option<TypeRef>,
        count: u64,
    },
    /// Integer, character, boolean or floating-point base type.
    Int
    {
        signed: bool,
    },
    /// Struct, class or union. `fields` is empty when expansion stopped here.
    Compound
    {
        name: &'a str,
        fields: &'a [TypeRef],
    },
    /// Named alias for another type.
    Typedef
    {
        name: &'a str,
        target: Option<TypeRef>,
    },
    Void,
    /// Anything the decoder does not model, or a node past the requested depth.
    Other
    {
        name: &'a str,
    },
}

/// Fixed-budget pool for expanded type nodes.
#[derive(Debug)]
pub struct TypeArena
{
    capacity: usize,
    used: usize,
    slots: Vec<Slot>,
    refs: Vec<TypeRef>,
    text: String,
}

/// Bytes charged for one node.
const SLOT_COST: usize = mem::size_of::<Slot>();

impl TypeArena
{
    /// Create an arena that may hold at most `capacity` bytes of nodes,
    /// child lists and names.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self
    {
        Self {
            capacity,
            used: 0,
            slots: Vec::new(),
            refs: Vec::new(),
            text: String::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize
    {
        self.capacity
    }

    /// Bytes charged so far.
    #[must_use]
    pub fn used(&self) -> usize
    {
        self.used
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.slots.is_empty()
    }

    /// Drop every node, keeping the budget.
    pub fn clear(&mut self)
    {
        self.used = 0;
        self.slots.clear();
        self.refs.clear();
        self.text.clear();
    }

    /// View a node.
    ///
    /// Returns `None` for a handle that does not belong to this arena.
    #[must_use]
    pub fn get(&self, node: TypeRef) -> Option<TypeNode<'_>>
    {
        let slot = self.slots.get(node.index())?;
        Some(match &slot.shape {
            Shape::Func { ret, args } => TypeNode::Func {
                ret: *ret,
                args: &self.refs[args.clone()],
            },
            Shape::Ptr { target } => TypeNode::Ptr { target: *target },
            Shape::Array { element, count } => TypeNode::Array {
                element: *element,
                count: *count,
            },
            Shape::Int { signed } => TypeNode::Int { signed: *signed },
            Shape::Compound { name, fields } => TypeNode::Compound {
                name: &self.text[name.clone()],
                fields: &self.refs[fields.clone()],
            },
            Shape::Typedef { name, target } => TypeNode::Typedef {
                name: &self.text[name.clone()],
                target: *target,
            },
            Shape::Void => TypeNode::Void,
            Shape::Other { name } => TypeNode::Other {
                name: &self.text[name.clone()],
            },
        })
    }

    /// Native type index the node was decoded from.
    #[must_use]
    pub fn type_id(&self, node: TypeRef) -> Option<u32>
    {
        self.slots.get(node.index()).map(|slot| slot.id)
    }

    /// Size in bytes of the type, 0 when unknown.
    #[must_use]
    pub fn size_of(&self, node: TypeRef) -> Option<u64>
    {
        self.slots.get(node.index()).map(|slot| slot.size)
    }

    fn charge(&mut self, bytes: usize) -> Result<()>
    {
        let next = self.used.saturating_add(bytes);
        if next > self.capacity {
            return Err(SymError::OutOfMemory(format!(
                "type pool of {} bytes exhausted",
                self.capacity
            )));
        }
        self.used = next;
        Ok(())
    }

    fn push_slot(&mut self, id: u32, size: u64, shape: Shape) -> Result<TypeRef>
    {
        self.charge(SLOT_COST)?;
        let index = u32::try_from(self.slots.len())
            .map_err(|_| SymError::OutOfMemory("type pool index overflow".to_string()))?;
        self.slots.push(Slot { id, size, shape });
        Ok(TypeRef(index))
    }

    fn push_text(&mut self, text: &str) -> Result<Range<usize>>
    {
        self.charge(text.len())?;
        let start = self.text.len();
        self.text.push_str(text);
        Ok(start..self.text.len())
    }

    /// Reserve `count` child slots, initialised to `fill`.
    fn push_refs(&mut self, count: usize, fill: TypeRef) -> Result<Range<usize>>
    {
        self.charge(count.saturating_mul(mem::size_of::<TypeRef>()))?;
        let start = self.refs.len();
        self.refs.resize(start + count, fill);
        Ok(start..self.refs.len())
    }

    pub(crate) fn alloc_void(&mut self, id: u32) -> Result<TypeRef>
    {
        self.push_slot(id, 0, Shape::Void)
    }

    pub(crate) fn alloc_int(&mut self, id: u32, size: u64, signed: bool) -> Result<TypeRef>
    {
        self.push_slot(id, size, Shape::Int { signed })
    }

    pub(crate) fn alloc_other(&mut self, id: u32, size: u64, name: &str) -> Result<TypeRef>
    {
        let name = self.push_text(name)?;
        self.push_slot(id, size, Shape::Other { name })
    }

    pub(crate) fn alloc_ptr(&mut self, id: u32, size: u64) -> Result<TypeRef>
    {
        self.push_slot(id, size, Shape::Ptr { target: None })
    }

    pub(crate) fn alloc_array(&mut self, id: u32, size: u64, count: u64) -> Result<TypeRef>
    {
        self.push_slot(id, size, Shape::Array { element: None, count })
    }

    pub(crate) fn alloc_typedef(&mut self, id: u32, name: &str) -> Result<TypeRef>
    {
        let name = self.push_text(name)?;
        self.push_slot(id, 0, Shape::Typedef { name, target: None })
    }

    /// Allocate a function node with `arg_count` argument slots to be filled
    /// through [`set_child`](Self::set_child).
    pub(crate) fn alloc_func(&mut self, id: u32, arg_count: usize) -> Result<TypeRef>
    {
        let node = self.push_slot(id, 0, Shape::Void)?;
        let args = self.push_refs(arg_count, node)?;
        self.slots[node.index()].shape = Shape::Func { ret: None, args };
        Ok(node)
    }

    /// Allocate a compound node with `field_count` field slots.
    pub(crate) fn alloc_compound(&mut self, id: u32, size: u64, name: &str, field_count: usize) -> Result<TypeRef>
    {
        let name = self.push_text(name)?;
        let node = self.push_slot(id, size, Shape::Void)?;
        let fields = self.push_refs(field_count, node)?;
        self.slots[node.index()].shape = Shape::Compound { name, fields };
        Ok(node)
    }

    /// Point the single child of a pointer, array, typedef or the return
    /// type of a function at `target`.
    pub(crate) fn set_target(&mut self, node: TypeRef, target: TypeRef)
    {
        if let Some(slot) = self.slots.get_mut(node.index()) {
            match &mut slot.shape {
                Shape::Ptr { target: t } | Shape::Typedef { target: t, .. } => *t = Some(target),
                Shape::Array { element, .. } => *element = Some(target),
                Shape::Func { ret, .. } => *ret = Some(target),
                _ => {}
            }
        }
    }

    /// Fill argument or field slot `index` of `node`.
    pub(crate) fn set_child(&mut self, node: TypeRef, index: usize, child: TypeRef)
    {
        let range = match self.slots.get(node.index()).map(|slot| &slot.shape) {
            Some(Shape::Func { args, .. }) => args.clone(),
            Some(Shape::Compound { fields, .. }) => fields.clone(),
            _ => return,
        };
        if index < range.len() {
            self.refs[range.start + index] = child;
        }
    }
}
