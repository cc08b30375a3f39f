pub mod compile;
pub mod interp;
pub mod leftrec;
pub mod output;
pub mod program;
