//! GooberLang: a small JavaScript-flavoured scripting language.
//!
//! Source is tokenized and parsed up front; any syntax problem is reported as
//! a [`CompileError`](crate::error::CompileError) before anything runs. The
//! tree-walking [`Interpreter`] then executes the program against a [`Host`],
//! which supplies the `GB.*` functions, cooperative checkpoints, logging and
//! randomness.

pub mod ast;
pub mod host;
pub mod interp;
pub mod lexer;
mod methods;
pub mod parser;
pub mod value;

pub use host::{build_gb, Host, HostFn};
pub use interp::{Interpreter, Interrupt, ScriptError, MAX_CALL_DEPTH};
pub use parser::parse;
pub use value::{FloatBuf, Object, Value};
