//! # dnsvisor-renderer
//!
//! Tera-based renderer for every file dnsvisor generates: the forwarding
//! daemon configuration and environment, `dnsmasq.d` nameserver fragments,
//! and per-interface ddclient configuration.
//!
//! ```rust,no_run
//! use dnsvisor_core::{ForwardingConfig, ForwardingLayout, InstanceName, Settings};
//! use dnsvisor_renderer::Renderer;
//!
//! fn render_default(settings: &Settings) {
//!     let layout = ForwardingLayout::for_instance(settings, &InstanceName::default_instance());
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(conf) = renderer.forwarding_conf(&layout, &ForwardingConfig::default()) {
//!             println!("{conf}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{default_protocol, DdclientContext, ForwardingContext};
pub use engine::{Renderer, TemplateKind};
pub use error::RenderError;
