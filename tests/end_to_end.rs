mod autoexport_test;
mod tests;
