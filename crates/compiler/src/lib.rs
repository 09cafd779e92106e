//! Pico Compiler Library
//!
//! Compiles Pico source text to portable stack-bytecode modules
//! (`.pexb`). The pipeline is strictly one-way:
//!
//! ```text
//! source -> tokens -> AST -> HIR -> typed HIR -> bytecode module
//! ```
//!
//! - [`token`]: tokenizer producing a located token stream
//! - [`parser`]: recursive-descent / Pratt parser producing the AST
//! - [`hirgen`]: scope resolution, symbol table, `while` desugaring
//! - [`sema`]: type checking, implicit cast insertion, late binding
//! - [`codegen`]: bytecode emission, constant pool, branch patching
//!
//! All state (type registry, function ids, label counters) is scoped to
//! one invocation of [`compile_source`]; nothing leaks between
//! compilations. Every phase reports the first error as a
//! [`PicoError`] carrying the offending token, which the driver renders
//! through [`diagnostics`].

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hir;
pub mod hirgen;
pub mod opcode;
pub mod parser;
pub mod sema;
pub mod symbol;
pub mod token;
pub mod types;

pub use codegen::{Emitter, IrModule};
pub use config::{CompilerConfig, ExternManifest};
pub use error::{ErrorKind, PicoError};
pub use hirgen::HirGen;
pub use parser::Parser;
pub use sema::Sema;
pub use token::{Token, Tokenizer};
pub use types::TypeRegistry;

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

/// Compile source text to an in-memory bytecode module.
pub fn compile_source_to_module(
    source: &str,
    config: &CompilerConfig,
) -> Result<IrModule, PicoError> {
    debug!(bytes = source.len(), "compiling");
    let program = Parser::parse(source)?;
    let mut registry = TypeRegistry::new();
    let mut hir = HirGen::generate(&mut registry, &program)?;
    Sema::analyze(&mut registry, &mut hir, config)?;
    Emitter::emit(&hir, &registry)
}

/// Compile source text to serialised module bytes.
pub fn compile_source(source: &str, config: &CompilerConfig) -> Result<Vec<u8>, PicoError> {
    Ok(compile_source_to_module(source, config)?.serialize())
}

/// Compile a source file to a `.pexb` module on disk.
///
/// On any error the returned string is a rendered diagnostic and no
/// output file is touched; the module is written through a temporary
/// file and renamed into place, so a partial module never appears.
pub fn compile_file(input: &Path, output: &Path) -> Result<(), String> {
    compile_file_with_config(input, output, &CompilerConfig::default())
}

pub fn compile_file_with_config(
    input: &Path,
    output: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("failed to read source file '{}': {}", input.display(), e))?;

    let bytes = compile_source(&source, config)
        .map_err(|err| diagnostics::render(&source, &input.display().to_string(), &err))?;

    write_module(output, &bytes)
        .map_err(|e| format!("failed to write module '{}': {}", output.display(), e))
}

/// Atomic module write: temporary sibling file plus rename.
fn write_module(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Constant;
    use crate::opcode;
    use crate::token::TokenTag;

    fn compile(source: &str) -> Vec<u8> {
        compile_source(source, &CompilerConfig::default()).unwrap()
    }

    /// Minimal reader for the serialised module format, used to check
    /// the emitted bytes end to end.
    struct ModuleReader<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    #[derive(Debug, PartialEq)]
    enum ReadConst {
        Int(u32),
        Str(String),
    }

    struct ReadFunction {
        function_id: u16,
        name_idx: u16,
        param_count: u16,
        local_count: u16,
        code: Vec<u8>,
    }

    struct ReadModule {
        consts: Vec<ReadConst>,
        entry_fn_id: u16,
        functions: Vec<ReadFunction>,
        extern_blocks: Vec<(u16, Vec<u16>)>,
    }

    impl<'a> ModuleReader<'a> {
        fn read(bytes: &'a [u8]) -> ReadModule {
            let mut reader = ModuleReader { bytes, pos: 0 };
            assert_eq!(reader.take(4), b"PEXB");
            assert_eq!(reader.take(12), vec![0u8; 12]);

            let const_count = reader.u16();
            let consts = (0..const_count)
                .map(|_| match reader.u8() {
                    0x01 => ReadConst::Int(reader.u32()),
                    0x02 => {
                        let len = reader.u16() as usize;
                        ReadConst::Str(String::from_utf8(reader.take(len)).unwrap())
                    }
                    tag => panic!("unknown constant tag {:#x}", tag),
                })
                .collect();

            let entry_fn_id = reader.u16();
            let function_count = reader.u16();
            let functions = (0..function_count)
                .map(|_| {
                    let function_id = reader.u16();
                    let name_idx = reader.u16();
                    let param_count = reader.u16();
                    let local_count = reader.u16();
                    let code_size = reader.u32() as usize;
                    let code = reader.take(code_size);
                    ReadFunction {
                        function_id,
                        name_idx,
                        param_count,
                        local_count,
                        code,
                    }
                })
                .collect();

            let extern_count = reader.u16();
            let extern_blocks = (0..extern_count)
                .map(|_| {
                    let indices_len = reader.u16();
                    let name_idx = reader.u16();
                    let indices = (0..indices_len).map(|_| reader.u16()).collect();
                    (name_idx, indices)
                })
                .collect();

            assert_eq!(reader.pos, bytes.len(), "trailing bytes in module");
            ReadModule {
                consts,
                entry_fn_id,
                functions,
                extern_blocks,
            }
        }

        fn u8(&mut self) -> u8 {
            let value = self.bytes[self.pos];
            self.pos += 1;
            value
        }

        fn u16(&mut self) -> u16 {
            let value = u16::from_le_bytes([self.bytes[self.pos], self.bytes[self.pos + 1]]);
            self.pos += 2;
            value
        }

        fn u32(&mut self) -> u32 {
            let value = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
            self.pos += 4;
            value
        }

        fn take(&mut self, len: usize) -> Vec<u8> {
            let value = self.bytes[self.pos..self.pos + len].to_vec();
            self.pos += len;
            value
        }
    }

    #[test]
    fn test_return_constant_module_layout() {
        // the smallest interesting program, checked byte for byte
        let bytes = compile("fn main()int{return 5;}");
        let mut expected = Vec::new();
        expected.extend_from_slice(b"PEXB");
        expected.extend_from_slice(&[0u8; 12]);
        expected.extend_from_slice(&2u16.to_le_bytes()); // const count
        expected.push(0x01);
        expected.extend_from_slice(&5u32.to_le_bytes());
        expected.push(0x02);
        expected.extend_from_slice(&4u16.to_le_bytes());
        expected.extend_from_slice(b"main");
        expected.extend_from_slice(&0u16.to_le_bytes()); // entry fn id
        expected.extend_from_slice(&1u16.to_le_bytes()); // function count
        expected.extend_from_slice(&0u16.to_le_bytes()); // function id
        expected.extend_from_slice(&1u16.to_le_bytes()); // name idx
        expected.extend_from_slice(&0u16.to_le_bytes()); // param count
        expected.extend_from_slice(&0u16.to_le_bytes()); // local count
        expected.extend_from_slice(&4u32.to_le_bytes()); // code size
        expected.extend_from_slice(&[opcode::LIC, 0x00, 0x00, opcode::RET]);
        expected.extend_from_slice(&0u16.to_le_bytes()); // extern count
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_two_locals_module() {
        let bytes = compile("fn main()int{let a=2;let b=3;return a+b;}");
        let module = ModuleReader::read(&bytes);
        assert_eq!(
            module.consts,
            vec![
                ReadConst::Int(2),
                ReadConst::Int(3),
                ReadConst::Str("main".to_string())
            ]
        );
        let main = &module.functions[0];
        assert_eq!(main.name_idx, 2);
        assert_eq!(main.local_count, 2);
        assert_eq!(
            main.code,
            vec![
                opcode::LIC, 0, 0,
                opcode::STORE, 0, 0,
                opcode::LIC, 1, 0,
                opcode::STORE, 1, 0,
                opcode::LOAD, 0, 0,
                opcode::LOAD, 1, 0,
                opcode::IADD,
                opcode::RET,
            ]
        );
    }

    #[test]
    fn test_log_shift_module() {
        let bytes = compile("fn main()void{log 2>>3;}");
        let module = ModuleReader::read(&bytes);
        assert_eq!(
            module.consts,
            vec![
                ReadConst::Int(2),
                ReadConst::Int(3),
                ReadConst::Str("main".to_string())
            ]
        );
        // no implicit RET: the source has no `return`
        assert_eq!(
            module.functions[0].code,
            vec![
                opcode::LIC, 0, 0,
                opcode::LIC, 1, 0,
                opcode::ISHR,
                opcode::LOG,
            ]
        );
    }

    #[test]
    fn test_if_else_both_arms_reachable() {
        let bytes = compile("fn main()int{if(1){return 1;}else{return 2;}}");
        let module = ModuleReader::read(&bytes);
        let code = &module.functions[0].code;
        // find the JF and JMP targets and check both point inside the code
        let jf_pos = code.iter().position(|&b| b == opcode::JF).unwrap();
        let jf_target = u16::from_le_bytes([code[jf_pos + 1], code[jf_pos + 2]]) as usize;
        let jmp_pos = code.iter().position(|&b| b == opcode::JMP).unwrap();
        let jmp_target = u16::from_le_bytes([code[jmp_pos + 1], code[jmp_pos + 2]]) as usize;
        assert!(jf_target <= code.len());
        assert!(jmp_target <= code.len());
        // the else arm starts exactly where JF lands
        assert_eq!(code[jf_target], opcode::LIC);
        // and the then-arm's JMP skips it entirely
        assert_eq!(jmp_target, code.len());
    }

    #[test]
    fn test_extern_module_layout() {
        let bytes = compile(
            "extern @libm=\"m\"{ fn sqrt(int x)int; } fn main()int{return libm::sqrt(9);}",
        );
        let module = ModuleReader::read(&bytes);
        assert_eq!(module.extern_blocks.len(), 1);
        let (name_idx, indices) = &module.extern_blocks[0];
        assert_eq!(module.consts[*name_idx as usize], ReadConst::Str("m".to_string()));
        assert_eq!(indices.len(), 1);
        assert_eq!(
            module.consts[indices[0] as usize],
            ReadConst::Str("m_sqrt".to_string())
        );
        // the call site uses the same constant
        let code = &module.functions[0].code;
        let call_pos = code.iter().position(|&b| b == opcode::CALL_EXTERN).unwrap();
        assert_eq!(
            u16::from_le_bytes([code[call_pos + 1], code[call_pos + 2]]),
            indices[0]
        );
    }

    #[test]
    fn test_struct_module() {
        let bytes = compile("struct P{int x;} fn main()int{let p=P{.x=7}; return p.x;}");
        let module = ModuleReader::read(&bytes);
        let code = &module.functions[0].code;
        assert_eq!(code[0], opcode::ALLOCA_STRUCT);
        assert_eq!(u16::from_le_bytes([code[1], code[2]]), 1);
        assert!(code.windows(3).any(|w| w == [opcode::SET_FIELD, 0, 0]));
        assert!(code.windows(3).any(|w| w == [opcode::LOAD_FIELD, 0, 0]));
        assert_eq!(*code.last().unwrap(), opcode::RET);
    }

    #[test]
    fn test_entry_fn_id_tracks_main() {
        let bytes = compile("fn a()void{} fn main()void{log 1;} fn b()void{}");
        let module = ModuleReader::read(&bytes);
        assert_eq!(module.entry_fn_id, 1);
        assert_eq!(module.functions.len(), 3);
        for (index, function) in module.functions.iter().enumerate() {
            assert_eq!(function.function_id as usize, index);
            assert!(function.local_count >= function.param_count);
        }
    }

    #[test]
    fn test_token_round_trip_preserves_tags_and_values() {
        // lexing the printed token stream again keeps tags and values
        let source = "fn main()int{let a = 2; return a << 3;}";
        let tokens = Tokenizer::tokenize(source).unwrap();
        let printable: Vec<String> = tokens
            .iter()
            .filter(|t| t.tag != TokenTag::Eof)
            .map(|t| {
                if t.value.is_empty() {
                    source[t.loc.start..t.loc.end].to_string()
                } else if t.tag == TokenTag::StrLit {
                    format!("{:?}", t.value)
                } else {
                    t.value.clone()
                }
            })
            .collect();
        let round_tripped = Tokenizer::tokenize(&printable.join(" ")).unwrap();
        assert_eq!(tokens.len(), round_tripped.len());
        for (a, b) in tokens.iter().zip(round_tripped.iter()) {
            assert_eq!(a.tag, b.tag);
            assert_eq!(a.value, b.value);
        }
    }

    #[test]
    fn test_first_error_reaches_the_caller() {
        let err = compile_source("fn main()int{return x;}", &CompilerConfig::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert!(err.message.contains("undeclared"));

        let err = compile_source("fn main()int{return 5}", &CompilerConfig::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);

        let err = compile_source("fn main()int{return ?;}", &CompilerConfig::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
    }

    #[test]
    fn test_compile_file_writes_module() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("demo.pico");
        let output = dir.path().join("demo.pexb");
        fs::write(&input, "fn main()int{return 5;}").unwrap();

        compile_file(&input, &output).unwrap();
        let bytes = fs::read(&output).unwrap();
        assert_eq!(&bytes[..4], b"PEXB");
        // no temporary file left behind
        assert!(!dir.path().join("demo.pexb.tmp").exists());
    }

    #[test]
    fn test_compile_file_failure_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.pico");
        let output = dir.path().join("bad.pexb");
        fs::write(&input, "fn main()int{return x;}").unwrap();

        let rendered = compile_file(&input, &output).unwrap_err();
        assert!(rendered.contains("undeclared identifier 'x'"));
        assert!(rendered.contains("bad.pico"));
        assert!(!output.exists());
    }

    #[test]
    fn test_implicit_widening_reaches_the_bytecode() {
        // widened argument, widened initialiser, widened return all
        // come out as I2L conversions
        let module = compile_source_to_module(
            "fn g(long x)long{return x;} fn main()long{let long a = 1; return g(2) + a;}",
            &CompilerConfig::default(),
        )
        .unwrap();
        let main_name = module
            .consts()
            .iter()
            .position(|c| *c == Constant::Str("main".to_string()))
            .unwrap() as u16;
        let main = module
            .functions
            .iter()
            .find(|f| f.name_idx == main_name)
            .unwrap();
        assert_eq!(
            main.code.iter().filter(|&&b| b == opcode::I2L).count(),
            2,
            "one widening per int literal"
        );
    }
}
