mod builder;
mod compare;
pub mod demos;
mod error;
mod frame;
mod heap;
mod image;
mod interpreter;
mod natives;
mod numero;
mod op;
mod tagged;

pub use builder::{BytecodeBuilder, Label};
pub use compare::Comparison;
pub use error::{Arena, RuntimeError, VmResult};
pub use frame::{Frame, LOCAL_COUNT, MAX_ARGUMENTS};
pub use heap::{Heap, HeapCreateInfo, HeapSettings, MAX_BLOB};
pub use image::{CLASS_CAPACITY, ClassImage, ClassImageBuilder, ClassLoader};
pub use interpreter::{ArrayLengthMode, Engine, EngineCreateInfo, ZeroBranchMode};
pub use natives::{NativeFunction, NativeMethod, default_natives, descriptors};
pub use numero::Numero;
pub use op::{Disassembly, Op, Operands};
pub use tagged::{Address, Kind, RefKind, Sign, Word};
