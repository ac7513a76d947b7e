mod allocate;
mod division;
mod evolve;
mod merge;
mod request;
pub(in crate::engine) mod steps;
