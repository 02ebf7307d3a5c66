pub mod ir;
pub mod parse;
pub mod pass;
pub mod pta;
pub mod stats;
pub mod util;
