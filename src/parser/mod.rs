pub mod refresh_result;
