mod comm;
