pub use super::attachments::Entity as Attachments;
