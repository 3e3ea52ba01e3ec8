//! Programs that ship with the binary, assembled in memory.
//!
//! Each one is laid out the way a compiler would emit it: pool slots for
//! `System.out`, external descriptors for library calls and the entry
//! method in slot 0.
use std::collections::HashMap;

use log::debug;

use crate::{
    BytecodeBuilder, ClassImage, ClassImageBuilder, ClassLoader, Heap, Op, RuntimeError,
    VmResult, natives::descriptors,
};

type Build = fn(&mut Heap) -> VmResult<ClassImage>;

const DEMOS: &[(&str, Build)] = &[
    ("Fibonacci", fibonacci),
    ("FibonacciLoop", fibonacci_loop),
    ("Concat", concat),
    ("ArraySum", array_sum),
    ("Counter", counter),
    ("Arity", arity),
];

/// Serves the built-in programs by class name.
///
/// Images live on the heap they were loaded into, so one loader must only
/// ever be used with one heap.
#[derive(Debug, Default)]
pub struct DemoLoader {
    cache: HashMap<String, ClassImage, ahash::RandomState>,
}

impl DemoLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        DEMOS.iter().map(|(name, _)| *name)
    }
}

impl ClassLoader for DemoLoader {
    fn load_class(&mut self, heap: &mut Heap, name: &str) -> VmResult<ClassImage> {
        if let Some(image) = self.cache.get(name) {
            return Ok(image.clone());
        }
        let (_, build) = DEMOS
            .iter()
            .find(|(demo, _)| *demo == name)
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))?;
        let image = build(heap)?;
        debug!("loaded demo {name}");
        self.cache.insert(name.to_string(), image.clone());
        Ok(image)
    }
}

/// Pool slots every printing program needs.
struct Console {
    out: u16,
    println: u16,
    println_int: u16,
}

impl Console {
    fn new(class: &mut ClassImageBuilder<'_>) -> VmResult<Self> {
        Ok(Self {
            out: class.field("java/lang/System", "out", "Ljava/io/PrintStream;")?,
            println: class.external(descriptors::PRINTLN_STRING)?,
            println_int: class.external(descriptors::PRINTLN_INT)?,
        })
    }

    fn print_text(&self, b: &mut BytecodeBuilder, text: u16) {
        b.pool(Op::Getstatic, self.out);
        b.ldc(text as u8);
        b.pool(Op::Invokevirtual, self.println);
    }

    fn print_local(&self, b: &mut BytecodeBuilder, slot: u8) {
        b.pool(Op::Getstatic, self.out);
        b.iload(slot);
        b.pool(Op::Invokevirtual, self.println_int);
    }
}

/// Pool slots of the `StringBuilder` protocol.
struct Builder {
    class: u16,
    init: u16,
    append_string: u16,
    append_int: u16,
    to_string: u16,
}

impl Builder {
    fn new(class: &mut ClassImageBuilder<'_>) -> VmResult<Self> {
        Ok(Self {
            class: class.class_name("java/lang/StringBuilder")?,
            init: class.external(descriptors::BUILDER_INIT)?,
            append_string: class.external(descriptors::BUILDER_APPEND_STRING)?,
            append_int: class.external(descriptors::BUILDER_APPEND_INT)?,
            to_string: class.external(descriptors::BUILDER_TO_STRING)?,
        })
    }

    /// `text + local` left on the stack as a string.
    fn concat(&self, b: &mut BytecodeBuilder, text: u16, slot: u8) {
        b.pool(Op::NewObj, self.class).op(Op::Dup);
        b.pool(Op::Invokespecial, self.init);
        b.ldc(text as u8).pool(Op::Invokevirtual, self.append_string);
        b.iload(slot).pool(Op::Invokevirtual, self.append_int);
        b.pool(Op::Invokevirtual, self.to_string);
    }
}

/// Recursive fibonacci of `args[0]`, tracing every call.
fn fibonacci(heap: &mut Heap) -> VmResult<ClassImage> {
    let mut class = ClassImageBuilder::new(heap, "Fibonacci")?;
    let console = Console::new(&mut class)?;
    let builder = Builder::new(&mut class)?;
    let parse_int = class.external(descriptors::PARSE_INT)?;
    let fib3 = class.string("fib3")?;
    let fib2 = class.string("fib2")?;
    let fib1 = class.string("fib1")?;
    let recursive = class.string("fib recursive")?;
    let result = class.string("The result is ")?;
    let fib = class.reserve()?;

    let mut b = BytecodeBuilder::new();
    let not_three = b.label();
    let not_two = b.label();
    let recurse = b.label();
    console.print_local(&mut b, 0);
    b.iload(0).push_int(3).branch(Op::IfIcmpne, not_three);
    console.print_text(&mut b, fib3);
    b.push_int(2).op(Op::Ireturn);
    b.bind(not_three);
    b.iload(0).push_int(2).branch(Op::IfIcmpne, not_two);
    console.print_text(&mut b, fib2);
    b.push_int(1).op(Op::Ireturn);
    b.bind(not_two);
    b.iload(0).push_int(2).branch(Op::IfIcmpge, recurse);
    console.print_text(&mut b, fib1);
    b.iload(0).op(Op::Ireturn);
    b.bind(recurse);
    console.print_text(&mut b, recursive);
    b.iload(0).push_int(1).op(Op::Isub).pool(Op::Invokestatic, fib);
    b.iload(0).push_int(2).op(Op::Isub).pool(Op::Invokestatic, fib);
    b.op(Op::Iadd).op(Op::Ireturn);
    class.define(fib, 1, &b.into_bytes()?)?;

    let mut b = BytecodeBuilder::new();
    b.aload(0).push_int(0).op(Op::Aaload);
    b.pool(Op::Invokestatic, parse_int).istore(1);
    b.iload(1).pool(Op::Invokestatic, fib).istore(2);
    b.pool(Op::Getstatic, console.out);
    builder.concat(&mut b, result, 2);
    b.pool(Op::Invokevirtual, console.println);
    b.op(Op::ReturnV);
    class.entry(1, &b.into_bytes()?)?;
    Ok(class.finish())
}

/// Prints the first six fibonacci numbers, one per line.
fn fibonacci_loop(heap: &mut Heap) -> VmResult<ClassImage> {
    let mut class = ClassImageBuilder::new(heap, "FibonacciLoop")?;
    let console = Console::new(&mut class)?;

    let mut b = BytecodeBuilder::new();
    let top = b.label();
    let done = b.label();
    b.push_int(0).istore(1).push_int(1).istore(2);
    b.push_int(0).istore(3);
    b.bind(top);
    b.iload(3).push_int(6).branch(Op::IfIcmpge, done);
    console.print_local(&mut b, 1);
    b.iload(1).iload(2).op(Op::Iadd).istore(4);
    b.iload(2).istore(1).iload(4).istore(2);
    b.iinc(3, 1).goto(top);
    b.bind(done);
    b.op(Op::ReturnV);
    class.entry(1, &b.into_bytes()?)?;
    Ok(class.finish())
}

fn concat(heap: &mut Heap) -> VmResult<ClassImage> {
    let mut class = ClassImageBuilder::new(heap, "Concat")?;
    let console = Console::new(&mut class)?;
    let builder = Builder::new(&mut class)?;
    let text = class.string("The answer is ")?;

    let mut b = BytecodeBuilder::new();
    b.push_int(42).istore(1);
    b.pool(Op::Getstatic, console.out);
    builder.concat(&mut b, text, 1);
    b.pool(Op::Invokevirtual, console.println);
    b.op(Op::ReturnV);
    class.entry(1, &b.into_bytes()?)?;
    Ok(class.finish())
}

/// Stores `i * i` for `i` in `0..10`, then sums the array back up.
fn array_sum(heap: &mut Heap) -> VmResult<ClassImage> {
    let mut class = ClassImageBuilder::new(heap, "ArraySum")?;
    let console = Console::new(&mut class)?;

    const INT_ARRAY: u8 = 10;
    let mut b = BytecodeBuilder::new();
    let fill = b.label();
    let summed = b.label();
    let sum = b.label();
    let done = b.label();
    b.push_int(10).newarray(INT_ARRAY).astore(1);
    b.push_int(0).istore(2);
    b.bind(fill);
    b.iload(2).aload(1).op(Op::Arraylength).branch(Op::IfIcmpge, summed);
    b.aload(1).iload(2).iload(2).iload(2).op(Op::Imul).op(Op::Iastore);
    b.iinc(2, 1).goto(fill);
    b.bind(summed);
    b.push_int(0).istore(3).push_int(0).istore(2);
    b.bind(sum);
    b.iload(2).push_int(10).branch(Op::IfIcmpge, done);
    b.iload(3).aload(1).iload(2).op(Op::Iaload).op(Op::Iadd).istore(3);
    b.iinc(2, 1).goto(sum);
    b.bind(done);
    console.print_local(&mut b, 3);
    b.op(Op::ReturnV);
    class.entry(1, &b.into_bytes()?)?;
    Ok(class.finish())
}

/// An object with an instance counter and a static one, bumped through
/// virtual calls.
fn counter(heap: &mut Heap) -> VmResult<ClassImage> {
    let mut class = ClassImageBuilder::new(heap, "Counter")?;
    let console = Console::new(&mut class)?;
    let this = class.class_name("Counter")?;
    let other = class.class_name("java/lang/String")?;
    let object_init = class.external(descriptors::OBJECT_INIT)?;
    let count = class.field("Counter", "count", "I")?;
    let created = class.field("Counter", "created", "I")?;

    // void increment()
    let mut b = BytecodeBuilder::new();
    b.aload(0).op(Op::Dup).pool(Op::Getfield, count);
    b.push_int(1).op(Op::Iadd).pool(Op::Putfield, count);
    b.op(Op::ReturnV);
    let increment = class.method(0, &b.into_bytes()?)?;

    // void add(int by)
    let mut b = BytecodeBuilder::new();
    b.aload(0).op(Op::Dup).pool(Op::Getfield, count);
    b.iload(1).op(Op::Iadd).pool(Op::Putfield, count);
    b.op(Op::ReturnV);
    let add = class.method(1, &b.into_bytes()?)?;

    let mut b = BytecodeBuilder::new();
    let top = b.label();
    let done = b.label();
    b.pool(Op::NewObj, this).op(Op::Dup);
    b.pool(Op::Invokespecial, object_init).astore(1);
    b.aload(1).pool(Op::Checkcast, this).astore(1);
    // logs a mismatch and carries on
    b.aload(1).pool(Op::Checkcast, other).op(Op::Pop);
    b.aload(1).push_int(0).pool(Op::Putfield, count);
    b.push_int(0).pool(Op::Putstatic, created);
    b.push_int(0).istore(2);
    b.bind(top);
    b.iload(2).push_int(3).branch(Op::IfIcmpge, done);
    b.aload(1).pool(Op::Invokevirtual, increment);
    b.pool(Op::Getstatic, created).push_int(1).op(Op::Iadd);
    b.pool(Op::Putstatic, created);
    b.iinc(2, 1).goto(top);
    b.bind(done);
    b.aload(1).push_int(10).pool(Op::Invokevirtual, add);
    b.aload(1).pool(Op::Getfield, count).istore(3);
    console.print_local(&mut b, 3);
    b.pool(Op::Getstatic, created).istore(3);
    console.print_local(&mut b, 3);
    b.op(Op::ReturnV);
    class.entry(1, &b.into_bytes()?)?;
    Ok(class.finish())
}

/// Calls a four parameter method, which the calling convention rejects.
fn arity(heap: &mut Heap) -> VmResult<ClassImage> {
    let mut class = ClassImageBuilder::new(heap, "Arity")?;
    let sum4 = {
        let mut b = BytecodeBuilder::new();
        b.iload(0).iload(1).op(Op::Iadd).iload(2).op(Op::Iadd);
        b.iload(3).op(Op::Iadd).op(Op::Ireturn);
        class.method(4, &b.into_bytes()?)?
    };

    let mut b = BytecodeBuilder::new();
    b.push_int(1).push_int(2).push_int(3).push_int(4);
    b.pool(Op::Invokestatic, sum4).op(Op::Pop).op(Op::ReturnV);
    class.entry(1, &b.into_bytes()?)?;
    Ok(class.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, EngineCreateInfo};

    fn launch(name: &str, args: &[&str]) -> (VmResult<()>, String) {
        let mut engine = Engine::new(EngineCreateInfo::default(), Vec::new());
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let result = engine.launch(&mut DemoLoader::new(), name, &args);
        let out = String::from_utf8(engine.into_output()).expect("utf8 output");
        (result, out)
    }

    #[test]
    fn recursive_fibonacci_traces_its_calls() {
        let (result, out) = launch("Fibonacci", &["5"]);
        assert_eq!(result, Ok(()));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "5",
                "fib recursive",
                "4",
                "fib recursive",
                "3",
                "fib3",
                "2",
                "fib2",
                "3",
                "fib3",
                "The result is 5",
            ]
        );
    }

    #[test]
    fn recursive_fibonacci_of_larger_input() {
        let (result, out) = launch("Fibonacci", &["12"]);
        assert_eq!(result, Ok(()));
        assert_eq!(out.lines().last(), Some("The result is 144"));
    }

    #[test]
    fn fibonacci_without_argument_is_missing_input() {
        let (result, _) = launch("Fibonacci", &[]);
        assert_eq!(result, Err(RuntimeError::MissingInput));
    }

    #[test]
    fn fibonacci_loop_prints_the_sequence() {
        let (result, out) = launch("FibonacciLoop", &[]);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "0\n1\n1\n2\n3\n5\n");
    }

    #[test]
    fn concat_joins_text_and_number() {
        let (result, out) = launch("Concat", &[]);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "The answer is 42\n");
    }

    #[test]
    fn array_sum_prints_285() {
        let (result, out) = launch("ArraySum", &[]);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "285\n");
    }

    #[test]
    fn counter_uses_fields_and_statics() {
        let (result, out) = launch("Counter", &[]);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "13\n3\n");
    }

    #[test]
    fn arity_demo_is_rejected() {
        let (result, _) = launch("Arity", &[]);
        assert_eq!(result, Err(RuntimeError::UnsupportedArity { params: 4 }));
    }

    #[test]
    fn unknown_class() {
        let (result, _) = launch("Nope", &[]);
        assert_eq!(result, Err(RuntimeError::ClassNotFound("Nope".to_string())));
    }

    #[test]
    fn loader_caches_images() {
        let mut heap = Heap::default();
        let mut loader = DemoLoader::new();
        let first = loader.load_class(&mut heap, "Concat").expect("demo");
        let used = heap.words_used();
        let second = loader.load_class(&mut heap, "Concat").expect("demo");
        assert_eq!(first, second);
        assert_eq!(heap.words_used(), used, "a cached load allocates nothing");
        assert_eq!(DemoLoader::names().count(), 6);
    }
}
