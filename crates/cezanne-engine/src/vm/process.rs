//! Processes
//!
//! A [`Process`] owns everything one program run needs: the linked program,
//! its resolved natives, the global slots and the arena. It also provides
//! the builtin-kind helpers natives use to build and inspect values.

use std::sync::Arc;

use crate::format::{ClassId, ClassKind, Program};
use crate::vm::defaults::{DEFAULT_HEAP_WORDS, DEFAULT_REGISTER_FILE_SIZE};
use crate::vm::gc::{Arena, Collection, RootTracer};
use crate::vm::interpreter::{Interpreter, Thread};
use crate::vm::{NativeRegistry, ObjectRef, ResolvedNatives, VmError, VmResult};

/// Process configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmOptions {
    /// Arena size in words per semispace
    pub heap_size: usize,
    /// Registers per thread
    pub register_file_size: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_WORDS,
            register_file_size: DEFAULT_REGISTER_FILE_SIZE,
        }
    }
}

impl VmOptions {
    /// Set the arena size
    pub fn with_heap_size(mut self, words: usize) -> Self {
        self.heap_size = words;
        self
    }

    /// Set the register file size
    pub fn with_register_file_size(mut self, registers: usize) -> Self {
        self.register_file_size = registers;
        self
    }
}

/// Globals plus an embedder-supplied root source
struct ProcessRoots<'a, 'r> {
    globals: &'a mut [ObjectRef],
    extra: &'a mut (dyn RootTracer + 'r),
}

impl RootTracer for ProcessRoots<'_, '_> {
    fn trace(&mut self, collection: &mut Collection<'_>) -> VmResult<()> {
        collection.copy_all(self.globals)?;
        self.extra.trace(collection)
    }
}

/// A loaded program with its heap and globals
#[derive(Debug)]
pub struct Process {
    program: Arc<Program>,
    natives: ResolvedNatives,
    globals: Vec<ObjectRef>,
    arena: Arena,
    options: VmOptions,
    int_class: ClassId,
}

impl Process {
    /// Load `program`, resolving its external methods against `natives`
    pub fn new(
        program: impl Into<Arc<Program>>,
        natives: &NativeRegistry,
        options: VmOptions,
    ) -> VmResult<Self> {
        let program = program.into();
        let int_class = program
            .builtins
            .get(ClassKind::Int)
            .ok_or(VmError::MissingBuiltin(ClassKind::Int))?;
        let natives = ResolvedNatives::link(&program.external_methods, natives)?;
        log::debug!(
            "loaded program: {} globals, {} natives, heap {} words",
            program.global_count,
            natives.len(),
            options.heap_size
        );
        Ok(Self {
            globals: vec![ObjectRef::NIL; program.global_count as usize],
            arena: Arena::new(options.heap_size),
            program,
            natives,
            options,
            int_class,
        })
    }

    /// Run the program from its entry point until it halts
    pub fn run(&mut self) -> VmResult<ObjectRef> {
        self.interpreter()?.run()
    }

    /// An interpreter positioned at the program entry, for stepping
    pub fn interpreter(&mut self) -> VmResult<Interpreter<'_>> {
        let thread = Thread::new(self.options.register_file_size, self.int_class)?;
        Ok(Interpreter::new(self, thread))
    }

    /// The loaded program
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    /// Resolved natives
    pub fn natives(&self) -> &ResolvedNatives {
        &self.natives
    }

    /// The arena
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Configuration the process was created with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Global slot `index`
    pub fn global(&self, index: u32) -> VmResult<ObjectRef> {
        self.globals
            .get(index as usize)
            .copied()
            .ok_or(VmError::InvalidGlobal(index))
    }

    /// Overwrite global slot `index`
    pub fn set_global(&mut self, index: u32, value: ObjectRef) -> VmResult<()> {
        match self.globals.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::InvalidGlobal(index)),
        }
    }

    /// Allocate with the globals and `extra` as roots
    pub fn alloc_traced(
        &mut self,
        extra: &mut dyn RootTracer,
        class: ClassId,
        fields: &mut [ObjectRef],
    ) -> VmResult<ObjectRef> {
        let expected = self.program.field_count(class);
        if fields.len() != expected {
            return Err(VmError::TypeError(format!(
                "{} takes {} fields, got {}",
                class,
                expected,
                fields.len()
            )));
        }
        let mut roots = ProcessRoots {
            globals: &mut self.globals,
            extra,
        };
        self.arena
            .alloc(self.program.as_ref(), &mut roots, class, fields)
    }

    /// Force a collection with the globals and `extra` as roots
    pub fn collect(&mut self, extra: &mut dyn RootTracer) -> VmResult<()> {
        let mut roots = ProcessRoots {
            globals: &mut self.globals,
            extra,
        };
        self.arena.collect(self.program.as_ref(), &mut roots)
    }

    /// Class chosen for a builtin kind
    pub fn builtin(&self, kind: ClassKind) -> VmResult<ClassId> {
        self.program
            .builtins
            .get(kind)
            .ok_or(VmError::MissingBuiltin(kind))
    }

    /// Inline integer
    #[inline]
    pub fn int(&self, value: i32) -> ObjectRef {
        ObjectRef::new(self.int_class, value as u32)
    }

    /// Integer value of `obj`, which must be an integer
    pub fn int_value(&self, obj: ObjectRef) -> VmResult<i32> {
        if obj.class == self.int_class {
            Ok(obj.as_i32())
        } else {
            Err(VmError::TypeError(format!("expected an integer, got {:?}", obj)))
        }
    }

    /// Boolean object
    pub fn boolean(&self, value: bool) -> VmResult<ObjectRef> {
        let kind = if value { ClassKind::True } else { ClassKind::False };
        Ok(ObjectRef::new(self.builtin(kind)?, 0))
    }

    /// Truth value of `obj`, which must be a boolean
    pub fn bool_value(&self, obj: ObjectRef) -> VmResult<bool> {
        let builtins = &self.program.builtins;
        if Some(obj.class) == builtins.get(ClassKind::True) {
            Ok(true)
        } else if Some(obj.class) == builtins.get(ClassKind::False) {
            Ok(false)
        } else {
            Err(VmError::TypeError(format!("expected a boolean, got {:?}", obj)))
        }
    }

    /// Field `index` of `obj`, checked against its class
    pub fn field(&self, obj: ObjectRef, index: usize) -> VmResult<ObjectRef> {
        self.check_field(obj, index)?;
        self.arena.field(obj, index)
    }

    /// Overwrite field `index` of `obj`
    pub fn set_field(&mut self, obj: ObjectRef, index: usize, value: ObjectRef) -> VmResult<()> {
        self.check_field(obj, index)?;
        self.arena.set_field(obj, index, value)
    }

    fn check_field(&self, obj: ObjectRef, index: usize) -> VmResult<()> {
        if index < self.program.field_count(obj.class) {
            Ok(())
        } else {
            Err(VmError::FieldOutOfRange {
                class: obj.class,
                index,
            })
        }
    }

    /// Allocate an array holding `elements`
    pub fn alloc_array(
        &mut self,
        extra: &mut dyn RootTracer,
        elements: &mut [ObjectRef],
    ) -> VmResult<ObjectRef> {
        self.alloc_traced(extra, ClassId::array(elements.len()), elements)
    }

    /// Elements of the array `obj`
    pub fn as_array(&self, obj: ObjectRef) -> VmResult<Vec<ObjectRef>> {
        let len = obj
            .class
            .array_len()
            .ok_or_else(|| VmError::TypeError(format!("expected an array, got {:?}", obj)))?;
        Ok(self.arena.fields(obj, len)?.to_vec())
    }

    /// Allocate a string: a `String`-kind object whose first field is an
    /// array of byte integers
    pub fn alloc_string(&mut self, extra: &mut dyn RootTracer, text: &str) -> VmResult<ObjectRef> {
        let class = self.builtin(ClassKind::String)?;
        let field_count = self.program.field_count(class);
        if field_count == 0 {
            return Err(VmError::TypeError(format!("{} has no fields", class)));
        }
        let mut bytes: Vec<ObjectRef> = text.bytes().map(|b| self.int(b as i32)).collect();
        let array = self.alloc_array(extra, &mut bytes)?;
        let mut fields = vec![ObjectRef::NIL; field_count];
        fields[0] = array;
        self.alloc_traced(extra, class, &mut fields)
    }

    /// Text of the string `obj`
    pub fn as_string(&self, obj: ObjectRef) -> VmResult<String> {
        if Some(obj.class) != self.program.builtins.get(ClassKind::String) {
            return Err(VmError::TypeError(format!("expected a string, got {:?}", obj)));
        }
        let bytes = self
            .as_array(self.field(obj, 0)?)?
            .into_iter()
            .map(|b| self.int_value(b).map(|b| b as u8))
            .collect::<VmResult<Vec<u8>>>()?;
        String::from_utf8(bytes).map_err(|err| VmError::TypeError(err.to_string()))
    }
}
