// mcc — Mosaic Compiler Collection
//
// Library root: the schedule-lowering pass and the IR surface it consumes.

pub mod diag;
pub mod func;
pub mod fuse;
pub mod inject;
pub mod inline;
pub mod ir;
pub mod legality;
pub mod loop_nest;
pub mod lower;
pub mod names;
pub mod produce;
pub mod schedule;
pub mod simplify;
pub mod splits;
pub mod subst;
pub mod target;
pub mod validate;
pub mod visit;
