mod common;
mod job_repository_tests;
