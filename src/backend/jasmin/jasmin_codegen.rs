//! Jasmin Code Generator
//!
//! Translates stack-machine IR to Jasmin assembly. Routines become static
//! methods of the program class, globals become static fields and the module
//! initializer becomes `<clinit>`. Each record type gets a class of its own
//! with public instance fields.

use std::fmt::Write;

use log::debug;

use crate::backend::codegen::{Artifact, CodeGen};
use crate::middle::ir::*;
use crate::utils::{Error, Result};

const PRINT_STREAM: &str = "java/io/PrintStream";

/// Extra operand stack needed by `print` (the stream reference) and by
/// record creation (`new` + `dup`) beyond what the IR accounts for
const STACK_HEADROOM: usize = 2;

/// Jasmin code generator
pub struct JasminCodeGen {
    output: String,
    indent: usize,
    class_name: String,
}

impl JasminCodeGen {
    pub fn new() -> Self {
        Self {
            output: String::new(),
            indent: 0,
            class_name: String::new(),
        }
    }

    /// Write indented line
    fn writeln(&mut self, line: &str) {
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    /// JVM field descriptor for a value kind
    fn descriptor(kind: &ValueKind) -> String {
        match kind {
            ValueKind::Int => "I".to_string(),
            ValueKind::Bool => "Z".to_string(),
            ValueKind::Real => "D".to_string(),
            ValueKind::Str => "Ljava/lang/String;".to_string(),
            ValueKind::Array(element) => format!("[{}", Self::descriptor(element)),
            ValueKind::Record(name) => format!("L{};", name),
            ValueKind::Void => "V".to_string(),
        }
    }

    fn method_descriptor(params: &[ValueKind], ret: &ValueKind) -> String {
        let params: String = params.iter().map(Self::descriptor).collect();
        format!("({}){}", params, Self::descriptor(ret))
    }

    /// Type-letter prefix of typed instructions (`iload`, `dstore`, `areturn`)
    fn prefix(kind: &ValueKind) -> Result<&'static str> {
        match kind {
            ValueKind::Int | ValueKind::Bool => Ok("i"),
            ValueKind::Real => Ok("d"),
            ValueKind::Str | ValueKind::Array(_) | ValueKind::Record(_) => Ok("a"),
            ValueKind::Void => Err(Error::UnsupportedOperation("a value of kind void".to_string())),
        }
    }

    /// Prefix of array element instructions (`iaload`, `bastore`)
    fn array_prefix(element: &ValueKind) -> Result<&'static str> {
        match element {
            ValueKind::Bool => Ok("b"),
            other => Self::prefix(other),
        }
    }

    fn push_int(value: i64) -> Result<String> {
        let v = i32::try_from(value).map_err(|_| {
            Error::UnsupportedOperation(format!("integer constant {} does not fit in 32 bits", value))
        })?;
        Ok(match v {
            -1 => "iconst_m1".to_string(),
            0..=5 => format!("iconst_{}", v),
            -128..=127 => format!("bipush {}", v),
            -32768..=32767 => format!("sipush {}", v),
            _ => format!("ldc {}", v),
        })
    }

    fn push_constant(constant: &Constant) -> Result<String> {
        match constant {
            Constant::Int(v) => Self::push_int(*v),
            Constant::Real(v) if v.is_finite() => Ok(format!("ldc2_w {:?}", v)),
            Constant::Real(v) => Err(Error::UnsupportedOperation(format!("real constant {}", v))),
            Constant::Bool(b) => Ok(if *b { "iconst_1" } else { "iconst_0" }.to_string()),
            Constant::Str(s) => Ok(format!("ldc \"{}\"", escape(s))),
        }
    }

    /// Generate Jasmin code for an instruction
    fn generate_instruction(&mut self, inst: &Instruction) -> Result<()> {
        match inst {
            Instruction::Push(c) => {
                let line = Self::push_constant(c)?;
                self.writeln(&line);
            }

            Instruction::Load { slot, kind } => {
                let line = format!("{}load {}", Self::prefix(kind)?, slot);
                self.writeln(&line);
            }
            Instruction::Store { slot, kind } => {
                let line = format!("{}store {}", Self::prefix(kind)?, slot);
                self.writeln(&line);
            }

            Instruction::GetGlobal { name, kind } => {
                let line = format!("getstatic {}/{} {}", self.class_name, name, Self::descriptor(kind));
                self.writeln(&line);
            }
            Instruction::PutGlobal { name, kind } => {
                let line = format!("putstatic {}/{} {}", self.class_name, name, Self::descriptor(kind));
                self.writeln(&line);
            }

            Instruction::Binary { op, kind } => {
                let prefix = match (op, kind) {
                    (BinaryOp::Xor, ValueKind::Int | ValueKind::Bool) => "i",
                    (BinaryOp::Xor, _) => {
                        return Err(Error::UnsupportedOperation(format!("xor on {}", kind)))
                    }
                    (_, ValueKind::Int | ValueKind::Real) => Self::prefix(kind)?,
                    _ => return Err(Error::UnsupportedOperation(format!("{} on {}", op, kind))),
                };
                self.writeln(&format!("{}{}", prefix, op));
            }

            Instruction::Unary { op: UnaryOp::Neg, kind } => match kind {
                ValueKind::Int => self.writeln("ineg"),
                ValueKind::Real => self.writeln("dneg"),
                other => return Err(Error::UnsupportedOperation(format!("negation of {}", other))),
            },

            Instruction::Convert(Conversion::IntToReal) => self.writeln("i2d"),
            Instruction::Convert(Conversion::RealToInt) => self.writeln("d2i"),

            Instruction::CompareBranch { cond, kind, target } => match kind {
                ValueKind::Int | ValueKind::Bool => {
                    self.writeln(&format!("if_icmp{} {}", cond, target));
                }
                ValueKind::Real => {
                    // NaN must make every ordered comparison false
                    let cmp = match cond {
                        Condition::Lt | Condition::Le => "dcmpg",
                        _ => "dcmpl",
                    };
                    self.writeln(cmp);
                    self.writeln(&format!("if{} {}", cond, target));
                }
                _ if matches!(cond, Condition::Eq | Condition::Ne) => {
                    self.writeln(&format!("if_acmp{} {}", cond, target));
                }
                other => {
                    return Err(Error::UnsupportedOperation(format!(
                        "{} comparison on {}",
                        cond, other
                    )))
                }
            },

            Instruction::BranchZero { cond, target } => {
                self.writeln(&format!("if{} {}", cond, target));
            }
            Instruction::Jump(target) => self.writeln(&format!("goto {}", target)),
            Instruction::Label(label) => {
                let saved = self.indent;
                self.indent = 0;
                self.writeln(&format!("{}:", label));
                self.indent = saved;
            }

            Instruction::Call { name, params, ret } => {
                let line = format!(
                    "invokestatic {}/{}{}",
                    self.class_name,
                    name,
                    Self::method_descriptor(params, ret)
                );
                self.writeln(&line);
            }

            Instruction::Return(ValueKind::Void) => self.writeln("return"),
            Instruction::Return(kind) => {
                let line = format!("{}return", Self::prefix(kind)?);
                self.writeln(&line);
            }

            Instruction::NewRecord(name) => {
                self.writeln(&format!("new {}", name));
                self.writeln("dup");
                self.writeln(&format!("invokespecial {}/<init>()V", name));
            }
            Instruction::GetField { record, field, kind } => {
                self.writeln(&format!("getfield {}/{} {}", record, field, Self::descriptor(kind)));
            }
            Instruction::PutField { record, field, kind } => {
                self.writeln(&format!("putfield {}/{} {}", record, field, Self::descriptor(kind)));
            }

            Instruction::NewArray(element) => {
                let line = match element {
                    ValueKind::Int => "newarray int".to_string(),
                    ValueKind::Bool => "newarray boolean".to_string(),
                    ValueKind::Real => "newarray double".to_string(),
                    ValueKind::Str => "anewarray java/lang/String".to_string(),
                    ValueKind::Record(name) => format!("anewarray {}", name),
                    ValueKind::Array(_) => format!("anewarray {}", Self::descriptor(element)),
                    ValueKind::Void => {
                        return Err(Error::UnsupportedOperation("array of void".to_string()))
                    }
                };
                self.writeln(&line);
            }
            Instruction::ArrayLoad(element) => {
                let line = format!("{}aload", Self::array_prefix(element)?);
                self.writeln(&line);
            }
            Instruction::ArrayStore(element) => {
                let line = format!("{}astore", Self::array_prefix(element)?);
                self.writeln(&line);
            }

            Instruction::Print(kind) => {
                let arg = match kind {
                    ValueKind::Int | ValueKind::Bool | ValueKind::Real | ValueKind::Str => {
                        Self::descriptor(kind)
                    }
                    other => return Err(Error::UnsupportedOperation(format!("printing {}", other))),
                };
                self.writeln(&format!("getstatic java/lang/System/out L{};", PRINT_STREAM));
                // move the stream below the value
                if kind.is_wide() {
                    self.writeln("dup_x2");
                    self.writeln("pop");
                } else {
                    self.writeln("swap");
                }
                self.writeln(&format!("invokevirtual {}/println({})V", PRINT_STREAM, arg));
            }

            Instruction::Dup => self.writeln("dup"),
            Instruction::Pop(kind) if kind.is_wide() => self.writeln("pop2"),
            Instruction::Pop(ValueKind::Void) => {}
            Instruction::Pop(_) => self.writeln("pop"),
        }
        Ok(())
    }

    /// Generate a method from a lowered routine
    fn generate_method(&mut self, header: &str, routine: &RoutineCode) -> Result<()> {
        debug!("emitting method {}", routine.name);
        self.writeln(header);
        self.indent += 1;
        self.writeln(&format!(".limit stack {}", routine.max_stack + STACK_HEADROOM));
        self.writeln(&format!(".limit locals {}", routine.max_locals));
        for inst in &routine.instructions {
            self.generate_instruction(inst)?;
        }
        self.indent -= 1;
        self.writeln(".end method");
        self.writeln("");
        Ok(())
    }

    /// Default constructor shared by the program class and record classes
    fn generate_constructor(&mut self) {
        self.writeln(".method public <init>()V");
        self.indent += 1;
        self.writeln("aload_0");
        self.writeln("invokespecial java/lang/Object/<init>()V");
        self.writeln("return");
        self.indent -= 1;
        self.writeln(".end method");
        self.writeln("");
    }

    /// JVM entry point forwarding to a parameterless `main` routine
    fn generate_entry_point(&mut self, main: &RoutineCode) {
        self.writeln(".method public static main([Ljava/lang/String;)V");
        self.indent += 1;
        self.writeln(&format!(".limit stack {}", main.ret.width()));
        self.writeln(".limit locals 1");
        self.writeln(&format!(
            "invokestatic {}/main{}",
            self.class_name,
            Self::method_descriptor(&[], &main.ret)
        ));
        match main.ret.width() {
            0 => {}
            1 => self.writeln("pop"),
            _ => self.writeln("pop2"),
        }
        self.writeln("return");
        self.indent -= 1;
        self.writeln(".end method");
        self.writeln("");
    }

    /// Generate the program class
    pub fn generate_source(&mut self, module: &Module) -> Result<String> {
        self.output.clear();
        self.indent = 0;
        self.class_name = module.name.clone();

        self.writeln(&format!(".class public {}", module.name));
        self.writeln(".super java/lang/Object");
        self.writeln("");

        for global in &module.globals {
            let line = format!(".field public static {} {}", global.name, Self::descriptor(&global.kind));
            self.writeln(&line);
        }
        if !module.globals.is_empty() {
            self.writeln("");
        }

        self.generate_constructor();

        if let Some(init) = &module.initializer {
            self.generate_method(".method static <clinit>()V", init)?;
        }

        for routine in &module.routines {
            let header = format!(
                ".method public static {}{}",
                routine.name,
                Self::method_descriptor(&routine.params, &routine.ret)
            );
            self.generate_method(&header, routine)?;
        }

        if let Some(main) = module.routine("main").filter(|main| main.params.is_empty()) {
            self.generate_entry_point(main);
        }

        Ok(std::mem::take(&mut self.output))
    }

    /// Generate the class holding one record type
    pub fn generate_record(&mut self, def: &TypeDefinition) -> String {
        self.output.clear();
        self.indent = 0;

        self.writeln(&format!(".class public {}", def.name));
        self.writeln(".super java/lang/Object");
        self.writeln("");
        for (field, kind) in &def.fields {
            let line = format!(".field public {} {}", field, Self::descriptor(kind));
            self.writeln(&line);
        }
        if !def.fields.is_empty() {
            self.writeln("");
        }
        self.generate_constructor();

        std::mem::take(&mut self.output)
    }
}

impl Default for JasminCodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGen for JasminCodeGen {
    fn generate(&mut self, module: &Module) -> Result<Vec<Artifact>> {
        let mut artifacts = vec![Artifact {
            file_name: format!("{}.j", module.name),
            contents: self.generate_source(module)?,
        }];
        for def in &module.types {
            artifacts.push(Artifact {
                file_name: format!("{}.j", def.name),
                contents: self.generate_record(def),
            });
        }
        Ok(artifacts)
    }

    fn name(&self) -> &str {
        "Jasmin"
    }
}

/// Escape a string for a Jasmin `ldc` operand
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                // characters outside the BMP become a surrogate pair
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units).iter() {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{BinOp, Expr, Program, Stmt};
    use crate::frontend::semantic::SemanticAnalyzer;
    use crate::middle::ir_gen::{CodeGenerator, CodegenOptions};
    use crate::types::Type;
    use pretty_assertions::assert_eq;

    fn compile_to_ir(stmts: Vec<Stmt>) -> Module {
        let mut program = Program::new(stmts);
        let mut analyzer = SemanticAnalyzer::new();
        assert!(analyzer.analyze(&mut program).is_empty());
        CodeGenerator::new(analyzer.symbols(), CodegenOptions::default())
            .generate(&program)
            .unwrap()
    }

    fn generate_jasmin(stmts: Vec<Stmt>) -> String {
        let module = compile_to_ir(stmts);
        JasminCodeGen::new().generate_source(&module).unwrap()
    }

    fn single_routine(instructions: Vec<Instruction>) -> Module {
        let mut module = Module::new("Main");
        module.routines.push(RoutineCode {
            name: "f".into(),
            params: vec![],
            ret: ValueKind::Void,
            max_stack: max_stack_depth(&instructions),
            max_locals: 0,
            instructions,
        });
        module
    }

    #[test]
    fn test_class_skeleton_and_entry_point() {
        let j = generate_jasmin(vec![Stmt::routine(
            "main",
            vec![],
            None,
            vec![Stmt::print(Expr::string("hi"))],
        )]);
        assert!(j.starts_with(".class public Main\n.super java/lang/Object\n"));
        assert!(j.contains(".method public <init>()V\n    aload_0\n"));
        assert!(j.contains(".method public static main()V\n    .limit stack 3\n    .limit locals 0\n"));
        assert!(j.contains(
            "    ldc \"hi\"\n    getstatic java/lang/System/out Ljava/io/PrintStream;\n    swap\n    invokevirtual java/io/PrintStream/println(Ljava/lang/String;)V\n"
        ));
        assert!(j.contains(
            ".method public static main([Ljava/lang/String;)V\n    .limit stack 0\n    .limit locals 1\n    invokestatic Main/main()V\n    return\n"
        ));
    }

    #[test]
    fn test_no_entry_point_without_main() {
        let j = generate_jasmin(vec![Stmt::routine("helper", vec![], None, vec![])]);
        assert!(j.contains(".method public static helper()V"));
        assert!(!j.contains("([Ljava/lang/String;)V"));
    }

    #[test]
    fn test_routine_signature_and_returns() {
        let j = generate_jasmin(vec![Stmt::routine(
            "scale",
            vec![("n", Type::INTEGER), ("factor", Type::REAL)],
            Some(Type::REAL),
            vec![Stmt::ret(Expr::binary(Expr::var("n"), BinOp::Mul, Expr::var("factor")))],
        )]);
        assert!(j.contains(".method public static scale(ID)D"));
        assert!(j.contains("    iload 0\n    i2d\n    dload 1\n    dmul\n    dreturn\n"));
        assert!(j.contains("    .limit locals 3\n"));
    }

    #[test]
    fn test_real_print_moves_stream_below_value() {
        let j = generate_jasmin(vec![Stmt::routine(
            "main",
            vec![],
            None,
            vec![Stmt::print(Expr::real(2.5))],
        )]);
        assert!(j.contains(
            "    ldc2_w 2.5\n    getstatic java/lang/System/out Ljava/io/PrintStream;\n    dup_x2\n    pop\n    invokevirtual java/io/PrintStream/println(D)V\n"
        ));
    }

    #[test]
    fn test_reverse_for_loop() {
        let j = generate_jasmin(vec![Stmt::routine(
            "main",
            vec![],
            None,
            vec![
                Stmt::var("i", Type::INTEGER, None),
                Stmt::for_loop(
                    "i",
                    Expr::int(5),
                    Expr::int(1),
                    true,
                    vec![Stmt::print(Expr::var("i"))],
                ),
            ],
        )]);
        assert!(j.contains("    iconst_5\n    istore 1\nL0:\n    iload 1\n    iconst_1\n    if_icmplt L1\n"));
        assert!(j.contains("    iload 1\n    iconst_1\n    isub\n    istore 1\n    goto L0\nL1:\n"));
    }

    #[test]
    fn test_real_comparison_uses_nan_safe_compare() {
        let j = generate_jasmin(vec![Stmt::routine(
            "f",
            vec![("a", Type::REAL), ("b", Type::REAL)],
            None,
            vec![
                Stmt::print(Expr::binary(Expr::var("a"), BinOp::Lt, Expr::var("b"))),
                Stmt::print(Expr::binary(Expr::var("a"), BinOp::Gt, Expr::var("b"))),
            ],
        )]);
        assert!(j.contains("    dcmpg\n    iflt L0\n"));
        assert!(j.contains("    dcmpl\n    ifgt L2\n"));
    }

    #[test]
    fn test_globals_and_static_initializer() {
        let j = generate_jasmin(vec![
            Stmt::var("count", Type::INTEGER, Some(Expr::int(200))),
            Stmt::array("flags", Type::BOOLEAN, 4),
            Stmt::assign_element("flags", Expr::int(1), Expr::boolean(true)),
            Stmt::print(Expr::var("count")),
        ]);
        assert!(j.contains(".field public static count I\n.field public static flags [Z\n"));
        assert!(j.contains(".method static <clinit>()V\n"));
        assert!(j.contains("    sipush 200\n    putstatic Main/count I\n"));
        assert!(j.contains("    iconst_4\n    newarray boolean\n    putstatic Main/flags [Z\n"));
        assert!(j.contains("    getstatic Main/flags [Z\n    iconst_1\n    iconst_1\n    bastore\n"));
    }

    #[test]
    fn test_record_artifacts() {
        let module = compile_to_ir(vec![
            Stmt::record("Point", vec![("x", Type::INTEGER), ("y", Type::REAL)]),
            Stmt::routine(
                "main",
                vec![],
                None,
                vec![
                    Stmt::var("p", Type::named("Point"), None),
                    Stmt::assign_field("p", "x", Expr::int(7)),
                    Stmt::print(Expr::field("p", "x")),
                ],
            ),
        ]);
        let artifacts = JasminCodeGen::new().generate(&module).unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["Main.j", "Point.j"]);

        let main = &artifacts[0].contents;
        assert!(main.contains("    new Point\n    dup\n    invokespecial Point/<init>()V\n    astore 0\n"));
        assert!(main.contains("    aload 0\n    bipush 7\n    putfield Point/x I\n"));
        assert!(main.contains("    getfield Point/x I\n"));

        assert_eq!(
            artifacts[1].contents,
            ".class public Point\n.super java/lang/Object\n\n\
             .field public x I\n.field public y D\n\n\
             .method public <init>()V\n    aload_0\n    invokespecial java/lang/Object/<init>()V\n    return\n.end method\n\n"
        );
    }

    #[test]
    fn test_integer_constants() {
        assert_eq!(JasminCodeGen::push_int(-1).unwrap(), "iconst_m1");
        assert_eq!(JasminCodeGen::push_int(3).unwrap(), "iconst_3");
        assert_eq!(JasminCodeGen::push_int(-100).unwrap(), "bipush -100");
        assert_eq!(JasminCodeGen::push_int(1000).unwrap(), "sipush 1000");
        assert_eq!(JasminCodeGen::push_int(70000).unwrap(), "ldc 70000");
    }

    #[test]
    fn test_out_of_range_constant_is_rejected() {
        let module = single_routine(vec![
            Instruction::Push(Constant::Int(1 << 40)),
            Instruction::Pop(ValueKind::Int),
            Instruction::Return(ValueKind::Void),
        ]);
        let err = JasminCodeGen::new().generate(&module).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
        assert!(err.is_internal());
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(escape("say \"hi\"\n"), "say \\\"hi\\\"\\n");
        assert_eq!(escape("é"), "\\u00e9");
        assert_eq!(escape("\u{1f600}"), "\\ud83d\\ude00");
    }

    #[test]
    fn test_nested_array_descriptors() {
        let grid = ValueKind::Array(Box::new(ValueKind::Array(Box::new(ValueKind::Real))));
        assert_eq!(JasminCodeGen::descriptor(&grid), "[[D");
        assert_eq!(
            JasminCodeGen::method_descriptor(&[grid, ValueKind::Str], &ValueKind::Bool),
            "([[DLjava/lang/String;)Z"
        );

        let module = single_routine(vec![
            Instruction::Push(Constant::Int(2)),
            Instruction::NewArray(ValueKind::Array(Box::new(ValueKind::Int))),
            Instruction::Pop(ValueKind::Array(Box::new(ValueKind::Array(Box::new(ValueKind::Int))))),
            Instruction::Return(ValueKind::Void),
        ]);
        let j = JasminCodeGen::new().generate_source(&module).unwrap();
        assert!(j.contains("    iconst_2\n    anewarray [I\n    pop\n    return\n"));
    }
}
