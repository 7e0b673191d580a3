
mod channel_tests;
