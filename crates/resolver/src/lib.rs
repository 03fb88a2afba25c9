//! Turns an agent template, a tenant instance and call-time variables into
//! one immutable [`ResolvedSpec`](af_domain::spec::ResolvedSpec).

pub mod render;
pub mod resolve;

pub use render::Renderer;
pub use resolve::{merge_variables, ResolveRequest, Resolver, TemplateSource};
