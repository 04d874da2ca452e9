//! Round-robin scheduler: ready pool, current/next pointers, tick and pend
//! handlers, and the join/end control paths that move descriptors between
//! pools.

pub mod scheduler;
