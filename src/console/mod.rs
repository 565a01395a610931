//! Streaming console core: line reassembly, scrollback, pausable reveal and write relay

pub mod reassembler;
pub mod relay;
pub mod renderer;
pub mod scrollback;
pub mod surface;

pub use reassembler::{CompletedLine, LineReassembler};
pub use relay::{run_relay, WriteRelay};
pub use renderer::{Progress, RenderCommand, RenderLoop, RenderState, Renderer, Reveal};
pub use scrollback::{Capacity, Line, ScrollbackBuffer, SharedScrollback};
pub use surface::{ConsoleSurface, Footer, MemorySurface, PlainSurface, TerminalSurface};
