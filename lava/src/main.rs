use clap::Parser as ClapParser;
use std::{
    io::{self, Write},
    process::ExitCode,
};

use lava::{
    ArrayLengthMode, CLASS_CAPACITY, ClassImage, ClassLoader, Disassembly, Engine,
    EngineCreateInfo, Heap, Kind, RefKind, VmResult, ZeroBranchMode, demos::DemoLoader,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Program to run
    #[arg(required_unless_present = "list", help = "Name of a built-in class")]
    class: Option<String>,

    /// Arguments passed to the entry method
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    #[arg(long, help = "List the built-in classes")]
    list: bool,

    /// Print the constant pool and bytecode instead of executing
    #[arg(long, help = "Dump constant pool + bytecode of the class")]
    dump_bytecode: bool,

    #[arg(long, help = "Zero branches only test for equality with zero")]
    equality_zero_branches: bool,

    #[arg(long, help = "arraylength computes the length but does not push it")]
    discard_array_length: bool,

    #[arg(long, default_value_t = 1024, help = "Maximum number of live frames")]
    max_frames: usize,

    /// -v for debug, -vv for a trace of every instruction
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if cli.list {
        for name in DemoLoader::names() {
            println!("{name}");
        }
        return ExitCode::SUCCESS;
    }
    let Some(class) = cli.class.as_deref() else {
        return ExitCode::FAILURE;
    };

    let info = EngineCreateInfo {
        zero_branches: if cli.equality_zero_branches {
            ZeroBranchMode::EqualityOnly
        } else {
            ZeroBranchMode::PerOpcode
        },
        array_length: if cli.discard_array_length {
            ArrayLengthMode::Discard
        } else {
            ArrayLengthMode::Push
        },
        max_frames: cli.max_frames,
        ..Default::default()
    };
    let mut engine = Engine::new(info, io::stdout().lock());
    let mut loader = DemoLoader::new();

    let result = if cli.dump_bytecode {
        loader
            .load_class(engine.heap_mut(), class)
            .and_then(|image| dump(engine.heap(), &image))
    } else {
        engine.launch(&mut loader, class, &cli.args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn dump(heap: &Heap, image: &ClassImage) -> VmResult<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "class {}", image.name())?;
    for index in 0..CLASS_CAPACITY as i64 {
        let entry = heap.row_load(image.class(), index)?;
        match entry.kind() {
            Kind::Reference(RefKind::Method) => {
                let (params, code) = heap.load_method(entry)?;
                writeln!(out, "#{index}: method ({params} params)")?;
                write!(out, "{}", Disassembly(code))?;
            }
            Kind::Reference(kind @ (RefKind::Ascii | RefKind::External)) => {
                writeln!(out, "#{index}: {} {:?}", kind.name(), heap.load_string(entry)?)?;
            }
            Kind::Reference(kind) => writeln!(out, "#{index}: {} {}", kind.name(), entry.address())?,
            Kind::Number(_) if entry.is_null() => {}
            Kind::Number(_) => writeln!(out, "#{index}: int {}", entry.to_numero())?,
        }
    }
    Ok(())
}
