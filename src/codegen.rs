use std::collections::HashMap;

use inkwell::{
    basic_block::BasicBlock,
    builder::{Builder, BuilderError},
    context::Context,
    module::{Linkage, Module},
    types::BasicMetadataTypeEnum,
    values::{BasicMetadataValueEnum, BasicValue, FloatValue, FunctionValue},
    FloatPredicate,
};
use tracing::debug;

use crate::ast::{ASTNode, Expression, Function, Prototype};

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CodegenError {
    #[error("unknown variable name {0}")]
    UnknownVariable(String),
    #[error("invalid binary operator {0}")]
    UnknownOperator(char),
    #[error("unknown function referenced {0}")]
    UnknownFunction(String),
    #[error("incorrect # of arguments in call to {callee}: expected {expected} found {found}")]
    InvalidCall {
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("{name} redeclared with {found} parameters, previously declared with {expected}")]
    Redefinition {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("failed to verify function {0}")]
    InvalidFunction(String),
    #[error("failed to remove a basic block from {0}")]
    BlockRemoval(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Lowers AST nodes into a module that persists across top-level forms.
/// `named_values` is the scope of the function currently being compiled
/// and is rebuilt for every function.
pub struct Codegen<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    pub named_values: HashMap<String, FloatValue<'a>>,
}

impl<'a> Codegen<'a> {
    pub fn new(context: &'a Context, module_name: &str) -> Codegen<'a> {
        let module = context.create_module(module_name);
        let builder = context.create_builder();

        Codegen {
            context,
            module,
            builder,
            named_values: HashMap::new(),
        }
    }

    fn codegen_expr(&self, expr: &Expression) -> Result<FloatValue<'a>, CodegenError> {
        match expr {
            Expression::Literal(value) => Ok(self.context.f64_type().const_float(*value)),
            Expression::Variable(name) => match self.named_values.get(name) {
                Some(&var) => Ok(var),
                None => Err(CodegenError::UnknownVariable(name.clone())),
            },
            Expression::Binary(op, left, right) => {
                if !matches!(*op, '+' | '-' | '*' | '<') {
                    return Err(CodegenError::UnknownOperator(*op));
                }

                let lhs = self.codegen_expr(left)?;
                let rhs = self.codegen_expr(right)?;

                let value = match *op {
                    '+' => self.builder.build_float_add(lhs, rhs, "addtmp")?,
                    '-' => self.builder.build_float_sub(lhs, rhs, "subtmp")?,
                    '*' => self.builder.build_float_mul(lhs, rhs, "multmp")?,
                    _ => {
                        let cmp =
                            self.builder
                                .build_float_compare(FloatPredicate::ULT, lhs, rhs, "cmptmp")?;
                        self.builder.build_unsigned_int_to_float(
                            cmp,
                            self.context.f64_type(),
                            "booltmp",
                        )?
                    }
                };
                Ok(value)
            }
            Expression::Call(callee, args) => {
                let func = self
                    .module
                    .get_function(callee)
                    .ok_or_else(|| CodegenError::UnknownFunction(callee.clone()))?;

                let expected = func.count_params() as usize;
                if expected != args.len() {
                    return Err(CodegenError::InvalidCall {
                        callee: callee.clone(),
                        expected,
                        found: args.len(),
                    });
                }

                let argsv = args
                    .iter()
                    .map(|arg| self.codegen_expr(arg).map(BasicMetadataValueEnum::from))
                    .collect::<Result<Vec<_>, _>>()?;

                match self
                    .builder
                    .build_call(func, argsv.as_slice(), "calltmp")?
                    .try_as_basic_value()
                    .left()
                {
                    Some(value) => Ok(value.into_float_value()),
                    None => Err(CodegenError::InvalidFunction(callee.clone())),
                }
            }
        }
    }

    /// Declares `proto` in the module, or returns the existing declaration
    /// of the same name when its arity agrees.
    pub fn compile_proto(&self, proto: &Prototype) -> Result<FunctionValue<'a>, CodegenError> {
        if !proto.is_anonymous() {
            if let Some(existing) = self.module.get_function(&proto.name) {
                let expected = existing.count_params() as usize;
                if expected != proto.args.len() {
                    return Err(CodegenError::Redefinition {
                        name: proto.name.clone(),
                        expected,
                        found: proto.args.len(),
                    });
                }
                return Ok(existing);
            }
        }

        let args_types: Vec<BasicMetadataTypeEnum> =
            vec![self.context.f64_type().into(); proto.args.len()];

        let fn_type = self.context.f64_type().fn_type(&args_types, false);
        let fn_val = self
            .module
            .add_function(&proto.name, fn_type, Some(Linkage::External));

        for (arg, name) in fn_val.get_param_iter().zip(&proto.args) {
            arg.into_float_value().set_name(name);
        }

        Ok(fn_val)
    }

    pub fn compile_fn(&mut self, function: &Function) -> Result<FunctionValue<'a>, CodegenError> {
        let Function {
            prototype: proto,
            body,
        } = function;

        let llvm_func = self.compile_proto(proto)?;
        let previous_body = llvm_func.get_basic_blocks();
        let previous_names: Vec<String> = llvm_func
            .get_param_iter()
            .map(|arg| {
                arg.into_float_value()
                    .get_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let entry = self.context.append_basic_block(llvm_func, "entry");
        self.builder.position_at_end(entry);

        self.named_values.clear();
        self.named_values.reserve(proto.args.len());
        for (arg, name) in llvm_func.get_param_iter().zip(&proto.args) {
            let arg = arg.into_float_value();
            arg.set_name(name);
            self.named_values.insert(name.clone(), arg);
        }

        if let Err(err) = self.compile_body(body) {
            discard_body(llvm_func, &previous_body, &previous_names)?;
            return Err(err);
        }

        // the new entry block supersedes any previous body
        delete_blocks(llvm_func, previous_body)?;

        if !llvm_func.verify(true) {
            discard_body(llvm_func, &[], &previous_names)?;
            return Err(CodegenError::InvalidFunction(proto.name.clone()));
        }

        debug!(name = %proto.name, "compiled function");
        Ok(llvm_func)
    }

    fn compile_body(&self, body: &Expression) -> Result<(), CodegenError> {
        let body = self.codegen_expr(body)?;
        self.builder.build_return(Some(&body))?;
        Ok(())
    }

    pub fn compile_node(&mut self, node: &ASTNode) -> Result<FunctionValue<'a>, CodegenError> {
        match node {
            ASTNode::Function(func) => self.compile_fn(func),
            ASTNode::Extern(proto) => self.compile_proto(proto),
        }
    }

    pub fn codegen(&mut self, ast_nodes: &[ASTNode]) -> Result<(), CodegenError> {
        for node in ast_nodes {
            self.compile_node(node)?;
        }

        Ok(())
    }

    /// Erases `function` from the module. The value must not be used again.
    pub fn remove(&mut self, function: FunctionValue<'a>) {
        unsafe {
            function.delete();
        }
    }

    pub fn print_module(&self) -> String {
        self.module.print_to_string().to_string()
    }
}

fn delete_blocks<'a>(
    function: FunctionValue<'a>,
    blocks: impl IntoIterator<Item = BasicBlock<'a>>,
) -> Result<(), CodegenError> {
    for block in blocks {
        unsafe { block.delete() }.map_err(|()| {
            CodegenError::BlockRemoval(function.get_name().to_string_lossy().into_owned())
        })?;
    }
    Ok(())
}

/// Undoes a failed body: every block outside `keep` goes and the parameter
/// names are restored. A function left without a body that nothing calls
/// is erased from the module.
fn discard_body<'a>(
    function: FunctionValue<'a>,
    keep: &[BasicBlock<'a>],
    names: &[String],
) -> Result<(), CodegenError> {
    let added = function
        .get_basic_blocks()
        .into_iter()
        .filter(|block| !keep.contains(block));
    delete_blocks(function, added)?;

    for (arg, name) in function.get_param_iter().zip(names) {
        arg.into_float_value().set_name(name);
    }

    if keep.is_empty() && function.as_global_value().get_first_use().is_none() {
        unsafe {
            function.delete();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use inkwell::{context::Context, values::AnyValue};
    use pretty_assertions::assert_eq;

    use super::{Codegen, CodegenError};
    use crate::{
        ast::{Expression, Function, Prototype},
        lexer::Lexer,
        parser::Parser,
    };

    fn compile<'a>(
        codegen: &mut Codegen<'a>,
        source: &str,
    ) -> Result<inkwell::values::FunctionValue<'a>, CodegenError> {
        let mut parser = Parser::new(Lexer::new(source.chars()));
        let ast = parser.parse_program().unwrap();
        let (last, rest) = ast.split_last().unwrap();
        codegen.codegen(rest)?;
        codegen.compile_node(last)
    }

    #[test]
    fn codegen_works() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        compile(&mut codegen, "extern sin(x); func thing(x) sin(x) * x;").unwrap();

        let ir = codegen.print_module();
        assert!(ir.contains("declare double @sin(double)"), "{}", ir);
        assert!(ir.contains("define double @thing(double %x)"), "{}", ir);
        assert!(ir.contains("call double @sin(double %x)"), "{}", ir);
        assert!(ir.contains("fmul double %calltmp, %x"), "{}", ir);
    }

    #[test]
    fn call_binds_literal_argument() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        let anon = compile(&mut codegen, "func id(x) x; id(5)").unwrap();

        let ir = anon.print_to_string().to_string();
        assert!(ir.contains("call double @id(double 5.000000e+00)"), "{}", ir);

        let call = anon
            .get_first_basic_block()
            .and_then(|block| block.get_first_instruction())
            .unwrap();
        // one argument plus the callee
        assert_eq!(call.get_num_operands(), 2);
    }

    #[test]
    fn operands_are_evaluated_independently() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        let func = compile(&mut codegen, "func sub(a b) a - b").unwrap();

        let ir = func.print_to_string().to_string();
        assert!(ir.contains("fsub double %a, %b"), "{}", ir);
    }

    #[test]
    fn comparison_yields_float() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        let func = compile(&mut codegen, "func lt(a b) a < b").unwrap();

        let ir = func.print_to_string().to_string();
        assert!(ir.contains("fcmp ult double %a, %b"), "{}", ir);
        assert!(ir.contains("uitofp i1 %cmptmp to double"), "{}", ir);
    }

    #[test]
    fn unknown_function() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert_eq!(
            compile(&mut codegen, "foo(1)").unwrap_err(),
            CodegenError::UnknownFunction("foo".to_string())
        );
        assert_eq!(codegen.module.get_functions().count(), 0);
    }

    #[test]
    fn wrong_argument_count() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert_eq!(
            compile(&mut codegen, "extern sin(x); sin(1, 2)").unwrap_err(),
            CodegenError::InvalidCall {
                callee: "sin".to_string(),
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn failed_definition_is_removed() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert_eq!(
            compile(&mut codegen, "func bad(x) y").unwrap_err(),
            CodegenError::UnknownVariable("y".to_string())
        );
        assert!(codegen.module.get_function("bad").is_none());
    }

    #[test]
    fn failed_definition_erases_unused_extern() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert!(compile(&mut codegen, "extern foo(a); func foo(a) b").is_err());
        assert!(codegen.module.get_function("foo").is_none());
    }

    #[test]
    fn failed_definition_keeps_called_extern() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert!(compile(&mut codegen, "extern foo(a); func g(x) foo(x); func foo(a) b").is_err());

        let foo = codegen.module.get_function("foo").unwrap();
        assert_eq!(foo.count_basic_blocks(), 0);
        assert!(codegen.module.verify().is_ok());
    }

    #[test]
    fn failed_redefinition_restores_previous_body() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert_eq!(
            compile(&mut codegen, "func f(x) x + 1; func g(x) f(x); func f(y) z").unwrap_err(),
            CodegenError::UnknownVariable("z".to_string())
        );

        let f = codegen.module.get_function("f").unwrap();
        assert_eq!(f.count_basic_blocks(), 1);
        let ir = f.print_to_string().to_string();
        assert!(ir.contains("fadd double %x, 1.000000e+00"), "{}", ir);
        assert!(codegen.module.verify().is_ok());
    }

    #[test]
    fn failed_recursive_definition_is_removed() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert!(compile(&mut codegen, "func f(x) f(x) + y").is_err());
        assert!(codegen.module.get_function("f").is_none());
    }

    #[test]
    fn scope_is_per_function() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert_eq!(
            compile(&mut codegen, "func f(a) a; func g(b) a").unwrap_err(),
            CodegenError::UnknownVariable("a".to_string())
        );
    }

    #[test]
    fn redefinition_replaces_body() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        compile(&mut codegen, "func f(x) x + 1; func f(y) y * 2").unwrap();

        assert_eq!(codegen.module.get_functions().count(), 1);
        let f = codegen.module.get_function("f").unwrap();
        assert_eq!(f.count_basic_blocks(), 1);

        let ir = f.print_to_string().to_string();
        assert!(ir.contains("fmul double %y, 2.000000e+00"), "{}", ir);
        assert!(!ir.contains("fadd"), "{}", ir);
        assert!(codegen.module.verify().is_ok());
    }

    #[test]
    fn redefinition_with_different_arity() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        assert_eq!(
            compile(&mut codegen, "extern f(a); func f(a b) a").unwrap_err(),
            CodegenError::Redefinition {
                name: "f".to_string(),
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn invalid_operator() {
        let context = Context::create();
        let mut codegen = Codegen::new(&context, "test");
        let func = Function {
            prototype: Prototype {
                name: "div".to_string(),
                args: vec!["a".to_string(), "b".to_string()],
            },
            body: Expression::Binary(
                '/',
                Box::new(Expression::Variable("a".to_string())),
                Box::new(Expression::Variable("b".to_string())),
            ),
        };
        assert_eq!(
            codegen.compile_fn(&func).unwrap_err(),
            CodegenError::UnknownOperator('/')
        );
        assert!(codegen.module.get_function("div").is_none());
    }
}
