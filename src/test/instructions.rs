//! One module per opcode, exercising the interpreter through complete
//! programs run against the stock test callbacks.

mod add;
mod and;
mod call;
mod cmp;
mod div;
mod jump;
mod jumpg;
mod jumpl;
mod jumpn;
mod jumpz;
mod r#move;
mod mul;
mod or;
mod ret;
mod shl;
mod shr;
mod sub;
mod xor;
