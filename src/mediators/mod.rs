mod common;

pub mod cleaner;
pub mod definer;
pub mod dynamic_expander;
pub mod job_worker;
pub mod up_to_date;
