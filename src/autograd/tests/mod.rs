//! Tests for autograd operations with gradient checking

mod prop_softmax;
mod test_utils;
mod unit_ops;
