pub mod butterfly;
pub mod commission;
pub mod markup;
