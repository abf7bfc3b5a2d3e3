// seexpr — expression shader node for multithreaded renderers
//
// Library root. Front end (lexer → parser → compile → eval), the variable
// binding layer (globals, vars), and the node core (instance, node,
// dispatch) that classifies an expression once per rebuild and serves
// concurrent evaluation requests. `render` is a host stand-in.

pub mod ast;
pub mod builtins;
pub mod compile;
pub mod diag;
pub mod dispatch;
pub mod eval;
pub mod globals;
pub mod id;
pub mod instance;
pub mod lexer;
pub mod node;
pub mod parser;
pub mod render;
pub mod value;
pub mod vars;

pub use dispatch::{FailureReason, ShadeError};
pub use globals::{InvocationContext, RenderOptions, ShaderGlobals};
pub use node::{Classification, NodeConfig, NodeParams, ShaderNode, Strategy};
pub use value::Vec3;
