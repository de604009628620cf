pub mod prelude;

pub mod attachments;
