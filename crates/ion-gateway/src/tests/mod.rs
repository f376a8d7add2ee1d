mod session_tests;
mod support;
mod typing_tests;
