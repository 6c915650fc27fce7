pub mod flows;
pub mod suite;

pub use flows::{
    Addressing, CreateValidatorFlow, DelegateFlow, Duplicate, DuplicateValidatorFlow,
    EditValidatorFlow, MultipleSendersFlow, RedelegateFlow, SameAccountTransferFlow, Target,
    TransferFlow, UndelegateFlow, run_case,
};
pub use suite::{SuiteError, load_test_cases, run_suite};

#[cfg(test)]
mod test_support;
