#[cfg(test)]
mod test_rules;

pub mod utils;
