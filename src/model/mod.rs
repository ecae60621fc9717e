pub mod email;

pub use email::{
    Email, EmailStatus, ExtractedData, InsertEmail, Sentiment, UpdateEmail, UrgencyClass,
    URGENT_THRESHOLD,
};
